use clap::Parser;
use smp_fabric::scenarios::{self, Scenario};
use smp_fabric::{CoreComplex, FabricConfig, FabricSnapshot, RunReport};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Demo program every hart runs
    #[arg(value_enum, default_value_t = Scenario::Blinky)]
    scenario: Scenario,

    /// JSON fabric configuration; command line options override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of harts
    #[arg(long)]
    harts: Option<u32>,

    /// Extra ticks per RAM access
    #[arg(long)]
    ram_wait_states: Option<u32>,

    /// Instruction prefetch depth per core (0 disables fetch modelling)
    #[arg(long)]
    prefetch_depth: Option<u32>,

    /// Abort the run after this many ticks
    #[arg(long)]
    max_ticks: Option<u64>,

    /// Toggles (blinky), increments per hart (counter) or timer interval in
    /// units of 16 ticks (timer)
    #[arg(short, long, default_value_t = 4)]
    iterations: u32,

    /// Write a bincode snapshot of the fabric after the run
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Restore a bincode snapshot before the run
    #[arg(long)]
    restore: Option<PathBuf>,
}

fn print_section(title: &str) {
    println!("\n\x1b[1;36m━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\x1b[0m");
    println!("\x1b[1;33m  ▸ {}\x1b[0m", title);
    println!("\x1b[1;36m━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\x1b[0m");
}

fn print_status(component: &str, status: &str, ok: bool) {
    let status_color = if ok { "\x1b[1;32m" } else { "\x1b[1;31m" };
    let check = if ok { "✓" } else { "✗" };
    println!("    \x1b[0;37m{:<40}\x1b[0m {}[{}] {}\x1b[0m", component, status_color, check, status);
}

fn print_info(key: &str, value: &str) {
    println!("    \x1b[0;90m├─\x1b[0m \x1b[0;37m{:<20}\x1b[0m \x1b[1;97m{}\x1b[0m", key, value);
}

fn build_config(args: &Args) -> Result<FabricConfig, smp_fabric::FabricError> {
    let mut config = match &args.config {
        Some(path) => FabricConfig::from_json_file(path)?,
        None => FabricConfig::default(),
    };
    if let Some(harts) = args.harts {
        config.num_harts = harts;
    }
    if let Some(wait) = args.ram_wait_states {
        config.ram_wait_states = wait;
    }
    if let Some(depth) = args.prefetch_depth {
        config.prefetch_depth = depth;
    }
    if let Some(max) = args.max_ticks {
        config.max_ticks = max;
    }
    config.validate()?;
    Ok(config)
}

fn print_report(report: &RunReport, complex: &CoreComplex) {
    print_section("RESULTS");
    print_info("Ticks", &report.ticks.to_string());
    print_info("mtime", &complex.clint().mtime().to_string());
    print_info("GPIO out", &format!("0b{:b}", complex.gpio().output()));
    print_info("Bus transactions", &report.bus.transactions.to_string());
    print_info("Bus errors", &report.bus.errors.to_string());
    print_info("Atomic-hold ticks", &report.bus.held_ticks.to_string());

    print_section("HARTS");
    for hart in &report.harts {
        let s = &hart.core;
        print_info(
            &format!("Hart {}", hart.hart),
            &format!(
                "{} instr, {} data, {} fetch, {} stall, {} starved, {} deferred, {} asleep, {} err",
                s.instructions,
                s.data_requests,
                s.fetches,
                s.stall_ticks,
                s.starved_ticks,
                hart.deferred_fetch_ticks,
                s.sleep_ticks,
                s.bus_errors
            ),
        );
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    print_section("FABRIC");
    let config = build_config(&args)?;
    let map = config.memory_map;
    print_info("Harts", &config.num_harts.to_string());
    print_info("RAM", &format!("0x{:08X} - 0x{:08X}", map.ram_base, map.ram_base as u64 + map.ram_size as u64));
    print_info("CLINT", &format!("0x{:08X}", map.clint_base));
    print_info("GPIO", &format!("0x{:08X}", map.gpio_base));
    print_info("RAM wait states", &config.ram_wait_states.to_string());
    print_info("Prefetch depth", &config.prefetch_depth.to_string());

    let mut complex = CoreComplex::new(config)?;
    if let Some(path) = &args.restore {
        let snapshot = FabricSnapshot::load(path)?;
        complex.restore(&snapshot)?;
        print_info("Restored", &format!("{} at tick {}", path.display(), snapshot.tick));
    }
    print_status("Core complex", "ONLINE", true);

    print_section(&format!("RUN {:?}", args.scenario).to_uppercase());
    let result = scenarios::run(&mut complex, args.scenario, args.iterations);
    match &result {
        Ok(report) => {
            print_status("Scenario", "COMPLETE", true);
            print_report(report, &complex);
        }
        Err(e) => print_status("Scenario", &e.to_string(), false),
    }

    if let Some(path) = &args.snapshot {
        complex.snapshot().save(path)?;
        print_info("Snapshot", &path.display().to_string());
    }

    result?;
    Ok(())
}
