use smp_fabric::bus::Device;
use smp_fabric::scenarios::{self, Layout, Scenario};
use smp_fabric::{CoreComplex, FabricConfig, FabricSnapshot};

fn complex(num_harts: u32) -> CoreComplex {
    CoreComplex::new(FabricConfig {
        num_harts,
        ..FabricConfig::default()
    })
    .unwrap()
}

#[test]
fn blinky_toggles_every_pin_under_the_mutex() {
    let mut cx = complex(4);
    let report = scenarios::run(&mut cx, Scenario::Blinky, 3).unwrap();

    // Three toggles each: every hart's pin ends high.
    assert_eq!(cx.gpio().output(), 0b1111);
    assert_eq!(cx.gpio().edges(), 12);
    // The released harts slept until their IPI.
    assert!(report.harts[1..].iter().all(|h| h.core.sleep_ticks > 0));
    for hart in 0..4 {
        assert!(!cx.clint().msw_irq(hart));
    }
}

#[test]
fn blinky_with_even_toggles_ends_dark() {
    let mut cx = complex(2);
    scenarios::run(&mut cx, Scenario::Blinky, 2).unwrap();
    assert_eq!(cx.gpio().output(), 0);
}

#[test]
fn timer_wakes_each_hart_at_its_deadline() {
    let mut cx = complex(2);
    scenarios::run(&mut cx, Scenario::Timer, 2).unwrap();

    let layout = Layout::new(&cx.config().memory_map, 2);
    let ram = &cx.bus().ram;
    for hart in 0..2 {
        let record = layout.wake_record(hart) - ram.base;
        let deadline = ram.load(record).unwrap();
        let woke = ram.load(record + 4).unwrap();
        assert!(woke >= deadline, "hart {hart} woke at {woke} before {deadline}");
        assert!(woke - deadline < 64, "hart {hart} overslept: {woke} vs {deadline}");
        // Parked again afterwards.
        assert!(!cx.clint().mtime_irq(hart));
    }
}

#[test]
fn snapshot_carries_state_into_a_new_complex() {
    let mut cx = complex(2);
    scenarios::run(&mut cx, Scenario::Counter, 5).unwrap();
    let bytes = cx.snapshot().to_bytes().unwrap();

    let mut resumed = complex(2);
    resumed.restore(&FabricSnapshot::from_bytes(&bytes).unwrap()).unwrap();
    scenarios::run(&mut resumed, Scenario::Counter, 5).unwrap();

    let layout = Layout::new(&resumed.config().memory_map, 2);
    let ram = &resumed.bus().ram;
    assert_eq!(ram.load(layout.counter - ram.base).unwrap(), 20);
    assert!(resumed.tick() > cx.tick());
}
