use std::{
    io::{ErrorKind, Read, Write},
    net::TcpStream,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
    thread::sleep,
    time::{Duration, Instant},
};

use client::{ClientError, PidHeaterClient};
use daq::{SharedSensor, SimDaq, TcType};
use proto::LineReader;
use shared::lock;
use supervisor::{Settings, Supervisor};
use supply::{SharedSupply, SimSupply, Supply};
use thermo::{Heater, Zone};

struct Bench {
    supervisor: Supervisor,
    supply: Arc<Mutex<SimSupply>>,
    daq: Arc<Mutex<SimDaq>>,
}

impl Bench {
    /// One zone per `(key, t_max)`, zone `i` on channel `i` of a shared
    /// 30 V supply and a shared DAQ reading 25 C everywhere.
    fn new(zones: &[(&str, f32)]) -> Self {
        Self::with_recv_timeout(zones, Settings::default().recv_timeout)
    }

    fn with_recv_timeout(zones: &[(&str, f32)], recv_timeout: Duration) -> Self {
        let supply = Arc::new(Mutex::new(SimSupply::new("PS", zones.len(), 30.0, 5.0)));
        let daq = Arc::new(Mutex::new(SimDaq::new("TC", zones.len(), TcType::K)));

        let zones = zones
            .iter()
            .enumerate()
            .map(|(ch, (key, t_max))| {
                lock(&daq).attach(ch, Box::new(|| Some(25.0))).unwrap();

                let heater = Heater {
                    name: format!("{} heater", key),
                    v_max: 30.0,
                    i_max: 3.0,
                    t_max: *t_max,
                };

                let ps: SharedSupply = supply.clone();
                let tc: SharedSensor = daq.clone();

                Zone::new(key, heater, ps, ch, tc, ch).unwrap()
            })
            .collect();

        let settings = Settings {
            bind: "127.0.0.1".to_owned(),
            port: 0,
            recv_timeout,
        };

        Self {
            supervisor: Supervisor::spawn(zones, &settings).unwrap(),
            supply,
            daq,
        }
    }

    fn client(&self) -> PidHeaterClient {
        PidHeaterClient::connect_timeout(self.supervisor.local_addr(), Duration::from_secs(5))
            .unwrap()
    }

    /// A raw connection for line-level checks
    fn raw(&self) -> (TcpStream, LineReader<TcpStream>) {
        let stream = TcpStream::connect(self.supervisor.local_addr()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        let reader = LineReader::new(stream.try_clone().unwrap());

        (stream, reader)
    }
}

fn wait_for(what: &str, timeout: Duration, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;

    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        sleep(Duration::from_millis(20));
    }
}

fn remote_kind(result: Result<(), ClientError>) -> String {
    match result {
        Err(ClientError::Remote(line)) => line.kind,
        other => panic!("expected a remote error, got {:?}", other),
    }
}

#[test]
fn basic_regulation() {
    let bench = Bench::new(&[("top", 100.0)]);

    // Rises half a degree per reading
    let readings = Arc::new(AtomicU32::new(0));
    let counter = readings.clone();
    lock(&bench.daq)
        .attach(
            0,
            Box::new(move || Some(25.0 + 0.5 * counter.fetch_add(1, Ordering::Relaxed) as f32)),
        )
        .unwrap();

    let mut client = bench.client();
    let mut top = client.zone("top").unwrap();

    top.set_setpoint(60.0).unwrap();
    top.ready().unwrap();
    top.set_sample_time(0.02).unwrap();
    top.set_regulating(true).unwrap();
    top.sync().unwrap();

    wait_for("30 ticks", Duration::from_secs(5), || top.ticks().unwrap() >= 30);

    let output: f32 = top.setpoint_voltage().unwrap().parse().unwrap();
    assert!(output > 0.0 && output < 30.0, "output {}", output);

    assert_eq!(top.setpoint().unwrap(), "60");
    assert_eq!(top.status().unwrap(), "regulating");
    assert!(readings.load(Ordering::Relaxed) >= 30);
}

#[test]
fn safety_trip() {
    let bench = Bench::new(&[("top", 80.0)]);

    let mut client = bench.client();

    {
        let mut top = client.zone("top").unwrap();
        top.set_setpoint(70.0).unwrap();
        top.ready().unwrap();
        top.set_sample_time(0.05).unwrap();
        top.set_regulating(true).unwrap();
        top.sync().unwrap();

        wait_for("a tick", Duration::from_secs(2), || top.ticks().unwrap() > 0);
    }

    lock(&bench.daq).inject(0, Some(95.0)).unwrap();

    let event = client
        .next_event(Duration::from_secs(2))
        .unwrap()
        .expect("no trip reported");
    assert_eq!(event.kind, "SafetyTrip");
    assert_eq!(event.request, None);

    let mut top = client.zone("top").unwrap();

    assert_eq!(top.regulating().unwrap(), "0");
    assert_eq!(top.status().unwrap(), "tripped");

    let volts: f32 = top.actual_voltage().unwrap().parse().unwrap();
    assert!(volts.abs() < 1e-3);

    assert!(!lock(&bench.supply).get_state(0).unwrap());
    assert_eq!(lock(&bench.supply).get_setpoint_voltage(0).unwrap(), 0.0);

    // Latched until readied again
    top.set_regulating(true).unwrap();
    assert_eq!(remote_kind(top.sync()), "SafetyTrip");

    top.ready().unwrap();
    top.set_regulating(true).unwrap();
    top.sync().unwrap();
    assert_eq!(top.status().unwrap(), "regulating");
}

#[test]
fn limit_arbitration() {
    let bench = Bench::new(&[("top", 100.0)]);

    let mut client = bench.client();
    let mut top = client.zone("top").unwrap();

    top.ready().unwrap();
    top.set_voltage(5.0).unwrap();
    top.sync().unwrap();

    top.set_voltage_limit(3.0).unwrap();
    assert_eq!(remote_kind(top.sync()), "LimitExceeded");

    // The limit may not come below the live setpoint
    top.set_voltage_limit(4.0).unwrap();
    assert_eq!(remote_kind(top.sync()), "LimitExceeded");

    top.set_voltage(4.0).unwrap();
    top.set_voltage_limit(4.0).unwrap();
    top.sync().unwrap();
    assert_eq!(top.voltage_limit().unwrap(), "4");

    top.set_voltage(4.5).unwrap();
    assert_eq!(remote_kind(top.sync()), "LimitExceeded");
    assert_eq!(top.setpoint_voltage().unwrap(), "4");
}

#[test]
fn concurrent_zones() {
    let bench = Bench::new(&[("a", 100.0), ("b", 100.0), ("c", 100.0)]);

    let mut client = bench.client();

    for key in ["a", "b", "c"] {
        let mut zone = client.zone(key).unwrap();
        zone.set_setpoint(50.0).unwrap();
        zone.set_sample_time(1.0).unwrap();
        zone.ready().unwrap();
        zone.sync().unwrap();
    }

    for key in ["a", "b", "c"] {
        client.zone(key).unwrap().set_regulating(true).unwrap();
    }

    sleep(Duration::from_millis(10_000));

    for key in ["a", "b", "c"] {
        client.zone(key).unwrap().set_regulating(false).unwrap();
    }

    for key in ["a", "b", "c"] {
        let ticks = client.zone(key).unwrap().ticks().unwrap();
        assert!((9..=11).contains(&ticks), "zone {} ticked {} times", key, ticks);
    }
}

#[test]
fn client_churn() {
    let bench = Bench::new(&[("top", 100.0)]);

    let before = {
        let mut client = bench.client();
        let mut top = client.zone("top").unwrap();

        top.set_setpoint(60.0).unwrap();
        top.set_sample_time(0.05).unwrap();
        top.ready().unwrap();
        top.set_regulating(true).unwrap();
        top.sync().unwrap();

        wait_for("a few ticks", Duration::from_secs(2), || top.ticks().unwrap() >= 3);

        top.ticks().unwrap()
    };

    sleep(Duration::from_millis(300));

    let mut client = bench.client();
    let mut top = client.zone("top").unwrap();

    assert_eq!(top.regulating().unwrap(), "1");
    assert_eq!(top.setpoint().unwrap(), "60");
    assert!(top.ticks().unwrap() > before);
}

#[test]
fn silent_client_is_dropped() {
    let bench = Bench::with_recv_timeout(&[("top", 100.0)], Duration::from_millis(200));

    let before = {
        let mut client = bench.client();
        let mut top = client.zone("top").unwrap();

        top.set_setpoint(60.0).unwrap();
        top.set_sample_time(0.05).unwrap();
        top.ready().unwrap();
        top.set_regulating(true).unwrap();
        top.sync().unwrap();

        wait_for("a few ticks", Duration::from_secs(2), || top.ticks().unwrap() >= 3);

        top.ticks().unwrap()
    };

    // Takes the port and never says a word
    let (mut silent, _) = bench.raw();
    let held = Instant::now();

    // Queued behind the silent one until the server gives up on it
    let mut client = bench.client();
    let mut top = client.zone("top").unwrap();

    assert_eq!(top.regulating().unwrap(), "1");
    assert!(held.elapsed() >= Duration::from_millis(150), "served after {:?}", held.elapsed());
    assert!(top.ticks().unwrap() > before);
    assert_eq!(top.status().unwrap(), "regulating");

    let mut buf = [0u8; 16];
    match silent.read(&mut buf) {
        Ok(0) => {}
        Err(e) if e.kind() == ErrorKind::ConnectionReset => {}
        other => panic!("silent client still connected: {:?}", other),
    }
}

#[test]
fn pid_reset() {
    let bench = Bench::new(&[("top", 100.0)]);

    let mut client = bench.client();
    let mut top = client.zone("top").unwrap();

    top.set_setpoint(50.0).unwrap();
    top.set_kp(5.0).unwrap();
    top.sync().unwrap();
    assert_eq!(top.kp().unwrap(), "5");

    top.reset_pid().unwrap();

    assert_eq!(top.kp().unwrap(), "1");
    assert_eq!(top.setpoint().unwrap(), "0");
}

#[test]
fn raw_lines() {
    let bench = Bench::new(&[("top", 100.0), ("bot", 100.0)]);

    let (mut stream, mut reader) = bench.raw();

    // Replies come back in request order
    stream
        .write_all(b"top PD:SETP 40\rtop PD:SETP ?\rbot PD:KPRO ?\r* AM:LIST ?\r")
        .unwrap();
    assert_eq!(reader.read_line().unwrap(), "40");
    assert_eq!(reader.read_line().unwrap(), "1");
    assert_eq!(reader.read_line().unwrap(), "top,bot");

    stream.write_all(b"side PD:SETP ?\r").unwrap();
    assert!(reader
        .read_line()
        .unwrap()
        .starts_with("ERROR: BadKey [side PD:SETP ?]"));

    stream.write_all(b"top PD:SETP\r").unwrap();
    assert!(reader
        .read_line()
        .unwrap()
        .starts_with("ERROR: ProtocolError [top PD:SETP]"));

    stream.write_all(b"garbage\r").unwrap();
    assert!(reader.read_line().unwrap().starts_with("ERROR: ProtocolError"));

    stream.write_all(b"top PD:SETP 500\rtop PD:SETP ?\r").unwrap();
    assert!(reader
        .read_line()
        .unwrap()
        .starts_with("ERROR: LimitExceeded [top PD:SETP 500]"));
    assert_eq!(reader.read_line().unwrap(), "40");
}

#[test]
fn shutdown_stops_every_zone() {
    let mut bench = Bench::new(&[("a", 100.0), ("b", 100.0)]);

    {
        let mut client = bench.client();

        for key in ["a", "b"] {
            let mut zone = client.zone(key).unwrap();
            zone.set_setpoint(60.0).unwrap();
            zone.set_sample_time(0.05).unwrap();
            zone.ready().unwrap();
            zone.set_regulating(true).unwrap();
            zone.sync().unwrap();
        }
    }

    wait_for("output", Duration::from_secs(2), || {
        lock(&bench.supply).get_setpoint_voltage(1).unwrap() > 0.0
    });

    bench.supervisor.shutdown();
    assert!(!bench.supervisor.is_running());

    let mut supply = lock(&bench.supply);
    for ch in 0..2 {
        assert!(!supply.get_state(ch).unwrap());
        assert_eq!(supply.get_setpoint_voltage(ch).unwrap(), 0.0);
    }
}
