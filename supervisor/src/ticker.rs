//! Per-zone tick threads

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use shared::{lock, sleep_till_or};
use tracing::trace;

use crate::SharedZone;

/// How often an idle zone is looked at for a change of state or period
const POLL_MS: u64 = 20;

pub(crate) fn spawn(
    key: &str,
    zone: SharedZone,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, std::io::Error> {
    thread::Builder::new()
        .name(format!("tick-{}", key))
        .spawn(move || run(zone, running))
}

/// Tick the zone once per sample period while it regulates.
///
/// Ticks are scheduled against the previous deadline, not the previous
/// wake-up, so the period does not drift. A tick that falls more than a
/// whole period behind restarts the schedule instead of bursting.
fn run(zone: SharedZone, running: Arc<AtomicBool>) {
    let poll = Duration::from_millis(POLL_MS);
    let mut last: Option<Instant> = None;

    while running.load(Ordering::Acquire) {
        let now = Instant::now();

        let wake = {
            let mut zone = lock(&zone);

            if !zone.regulating() {
                last = None;
                now + poll
            } else {
                let period = Duration::from_secs_f32(zone.sample_time());
                let due = last.map_or(now, |last| last + period);

                if due <= now {
                    let outcome = zone.tick(due);
                    trace!(zone = zone.key(), ?outcome, "tick");

                    let base = match now.saturating_duration_since(due) > period {
                        true => now,
                        false => due,
                    };
                    last = Some(base);

                    base + period
                } else {
                    due
                }
            }
        };

        // Never sleep past a poll, the period or the state may change
        if !sleep_till_or(wake.min(Instant::now() + poll), &running) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use daq::{SharedSensor, SimDaq, TcType};
    use supply::{SharedSupply, SimSupply};
    use thermo::{Heater, Zone};

    use super::*;

    #[test]
    fn ticks_at_the_sample_period() {
        let ps: SharedSupply = Arc::new(Mutex::new(SimSupply::new("PS", 1, 30.0, 5.0)));
        let tc = Arc::new(Mutex::new(SimDaq::new("TC", 1, TcType::K)));
        lock(&tc).attach(0, Box::new(|| Some(25.0))).unwrap();
        let tc: SharedSensor = tc;

        let heater = Heater {
            name: "band".to_owned(),
            v_max: 24.0,
            i_max: 3.0,
            t_max: 80.0,
        };

        let mut zone = Zone::new("a", heater, ps, 0, tc, 0).unwrap();
        zone.set_sample_time(0.1).unwrap();
        zone.set_setpoint(50.0).unwrap();
        zone.ready().unwrap();

        let zone = Arc::new(Mutex::new(zone));
        let running = Arc::new(AtomicBool::new(true));
        let handle = spawn("a", zone.clone(), running.clone()).unwrap();

        // Idle zones are never ticked
        thread::sleep(Duration::from_millis(200));
        assert_eq!(lock(&zone).ticks(), 0);

        lock(&zone).start().unwrap();
        thread::sleep(Duration::from_millis(1000));
        lock(&zone).halt().unwrap();

        running.store(false, Ordering::Release);
        handle.join().unwrap();

        let ticks = lock(&zone).ticks();
        assert!((8..=12).contains(&ticks), "{} ticks", ticks);
    }
}
