use smp_fabric::clint::MTIMECMP_OFFSET;
use smp_fabric::{CoreComplex, FabricConfig};
use smp_sync::HartBus;
use std::sync::Mutex;

#[test]
fn two_harts_timer_irq_rises_once_at_mtime_32_over_the_bus() {
    // Without prefetch every interrupt sample takes exactly one tick, and
    // mtime equals the tick number as long as nobody writes it.
    let mut cx = CoreComplex::new(FabricConfig {
        num_harts: 2,
        prefetch_depth: 0,
        ..FabricConfig::default()
    })
    .unwrap();
    let clint_base = cx.config().memory_map.clint_base;
    let samples = Mutex::new(Vec::new());

    cx.run(|ctx| {
        if ctx.hart_id() != 0 {
            return Ok(());
        }
        ctx.store(clint_base + MTIMECMP_OFFSET, 32)?;
        assert!(ctx.last_tick() < 30);
        while ctx.last_tick() < 40 {
            let irq = ctx.interrupts()?;
            samples.lock().unwrap().push((ctx.last_tick(), irq.timer));
        }
        Ok(())
    })
    .unwrap();

    let samples = samples.into_inner().unwrap();
    for pair in samples.windows(2) {
        assert_eq!(pair[1].0, pair[0].0 + 1, "samples must be back to back");
    }
    assert!(!samples[0].1);

    let rises: Vec<u64> = samples
        .windows(2)
        .filter(|pair| !pair[0].1 && pair[1].1)
        .map(|pair| pair[1].0)
        .collect();
    assert_eq!(rises, vec![32]);
    assert!(samples.iter().all(|&(tick, timer)| timer == (tick >= 32)));
    assert_eq!(cx.clint().mtimecmp(0), Some(32));
    assert!(!cx.clint().msw_irq(0));
}
