#![allow(unused)]
use std::cell::RefCell;
use std::time::Duration;

#[derive(Default, Clone)]
pub struct TimingStats {
    pub sweep_times: Vec<Duration>,
    pub dirichlet_times: Vec<Duration>,
    pub total_time: Duration,
}

impl TimingStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(feature = "timing")]
    pub fn print_summary(&self) {
        if self.sweep_times.is_empty() {
            return;
        }

        let total_sweep: Duration = self.sweep_times.iter().sum();
        let total_dirichlet: Duration = self.dirichlet_times.iter().sum();

        let accounted = total_sweep + total_dirichlet;
        let overhead = self.total_time.saturating_sub(accounted);

        println!("\n{}", "=".repeat(60));
        println!("{:^60}", "DIFFUSION TIMING SUMMARY");
        println!("{}", "=".repeat(60));
        println!(
            "Total simulation time:         {:.3}s",
            self.total_time.as_secs_f64()
        );
        println!("{}", "-".repeat(60));
        println!("Component breakdown:");
        println!(
            "  Tridiagonal sweeps:        {:>9.3}s   (avg: {:>9.3}ms)",
            total_sweep.as_secs_f64(),
            total_sweep.as_secs_f64() * 1000.0 / self.sweep_times.len() as f64
        );
        println!(
            "  Dirichlet enforcement:     {:>9.3}ms  (avg: {:>9.3}ms)",
            total_dirichlet.as_secs_f64() * 1000.0,
            total_dirichlet.as_secs_f64() * 1000.0 / self.dirichlet_times.len() as f64
        );
        println!("{}", "=".repeat(60));
        println!(
            "Agents/output/other:           {:>9.3}s",
            overhead.as_secs_f64()
        );
        println!(
            "Calls:                         {} sweeps, {} Dirichlet passes\n",
            self.sweep_times.len(),
            self.dirichlet_times.len()
        );
    }

    #[cfg(not(feature = "timing"))]
    pub fn print_summary(&self) {}
}

#[cfg(feature = "timing")]
thread_local! {
    static TIMING_STATS: RefCell<TimingStats> = RefCell::new(TimingStats::new());
}

#[cfg(feature = "timing")]
pub fn reset_timing() {
    TIMING_STATS.with(|stats| {
        *stats.borrow_mut() = TimingStats::new();
    });
}

#[cfg(not(feature = "timing"))]
pub fn reset_timing() {}

#[cfg(feature = "timing")]
pub fn record_sweep<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let start = std::time::Instant::now();
    let result = f();
    let elapsed = start.elapsed();
    TIMING_STATS.with(|stats| {
        stats.borrow_mut().sweep_times.push(elapsed);
    });
    result
}

#[cfg(not(feature = "timing"))]
pub fn record_sweep<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}

#[cfg(feature = "timing")]
pub fn record_dirichlet<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let start = std::time::Instant::now();
    let result = f();
    let elapsed = start.elapsed();
    TIMING_STATS.with(|stats| {
        stats.borrow_mut().dirichlet_times.push(elapsed);
    });
    result
}

#[cfg(not(feature = "timing"))]
pub fn record_dirichlet<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}

#[cfg(feature = "timing")]
pub fn finalize_timing(total_time: Duration) -> TimingStats {
    TIMING_STATS.with(|stats| {
        let mut s = stats.borrow_mut();
        s.total_time = total_time;
        s.clone()
    })
}

#[cfg(not(feature = "timing"))]
pub fn finalize_timing(_total_time: Duration) -> TimingStats {
    TimingStats::new()
}

#[cfg(feature = "timing")]
pub fn finalize_and_print(total_time: Duration) {
    let stats = finalize_timing(total_time);
    stats.print_summary();
}

#[cfg(not(feature = "timing"))]
pub fn finalize_and_print(_total_time: Duration) {}
