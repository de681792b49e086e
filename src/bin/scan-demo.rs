use std::time::{Duration, Instant};

use clap::{Arg, ArgAction, Command, value_parser};

use scanwindow::{ChannelMetadata, ProgressDelivery, Range, Reading, ScanConfiguration, ScanOptions};
use scanwindow::{ScanSession, ScanState, ThermocoupleType, Window};
use scanwindow::FaultCode;
use scanwindow::sys::sim::{Simulator, SimulatorOptions};

fn print_window(window: &Window, channels: &[ChannelMetadata]) {
    if window.is_empty() {
        println!("(no data yet)");
        return
    }
    for (slot, channel) in &window.channels {
        let label = channels[*slot].label.as_deref().unwrap_or("?");
        let values = channel.values.iter()
            .map(|reading| match reading {
                Reading::Float(value) => format!("{:8.3}", value),
                Reading::Integer(value) => format!("{:8}", value),
            })
            .collect::<Vec<_>>()
            .join(" ");
        match channel.warning {
            Some(warning) => println!("{:>8}: {} [{:?}]", label, values, warning),
            None => println!("{:>8}: {}", label, values),
        }
    }
}

fn main() -> scanwindow::Result<()> {
    env_logger::init();

    let matches = Command::new("scan-demo")
        .about("Run a scan against the simulated device and print the latest decoded frames")
        .arg(Arg::new("events")
            .long("events")
            .action(ArgAction::SetTrue)
            .help("Receive progress notifications instead of polling"))
        .arg(Arg::new("continuous")
            .short('c')
            .long("continuous")
            .action(ArgAction::SetTrue)
            .help("Reuse the buffer until stopped"))
        .arg(Arg::new("samples")
            .short('n')
            .long("samples")
            .value_parser(value_parser!(usize))
            .default_value("1000")
            .help("Samples per channel"))
        .arg(Arg::new("rate")
            .short('r')
            .long("rate")
            .value_parser(value_parser!(f64))
            .default_value("100")
            .help("Scan rate in Hz"))
        .arg(Arg::new("depth")
            .short('d')
            .long("depth")
            .value_parser(value_parser!(usize))
            .default_value("5")
            .help("Frames to display per channel"))
        .arg(Arg::new("duration")
            .long("duration")
            .value_parser(value_parser!(f64))
            .default_value("5")
            .help("Stop the scan after this many seconds"))
        .arg(Arg::new("open-thermocouple")
            .long("open-thermocouple")
            .action(ArgAction::SetTrue)
            .help("Simulate a disconnected thermocouple"))
        .arg(Arg::new("fault-after")
            .long("fault-after")
            .value_parser(value_parser!(u64))
            .help("Simulate a hardware fault after this many frames"))
        .get_matches();

    let rate = *matches.get_one::<f64>("rate").unwrap();
    let depth = *matches.get_one::<usize>("depth").unwrap();
    let duration = Duration::from_secs_f64(*matches.get_one::<f64>("duration").unwrap());
    let interval = Duration::from_millis(100);

    let mut options = ScanOptions::BACKGROUND;
    if matches.get_flag("continuous") {
        options |= ScanOptions::CONTINUOUS;
    }
    let config = ScanConfiguration {
        samples_per_channel: *matches.get_one::<usize>("samples").unwrap(),
        rate,
        options,
        delivery: if matches.get_flag("events") {
            ProgressDelivery::Events { every: ((rate / 10.0) as usize).max(1) }
        } else {
            ProgressDelivery::Polling { interval }
        },
        ..Default::default()
    };
    let channels = vec![
        ChannelMetadata::analog(Range::Bip10Volts).with_label("AI0"),
        ChannelMetadata::digital().with_label("PORTA"),
        ChannelMetadata::counter().with_label("CTR0"),
        ChannelMetadata::reference(0, 0.01, -40.0).with_label("CJC0"),
        ChannelMetadata::thermocouple(3, Range::BipPt078Volts, ThermocoupleType::K).with_label("TC0"),
    ];

    let session = ScanSession::new(Simulator::new(SimulatorOptions {
        open_thermocouples: matches.get_flag("open-thermocouple"),
        fault_after: matches.get_one::<u64>("fault-after").map(|&frames| (frames, FaultCode(-1))),
        ..Default::default()
    }));
    session.arm(channels.clone(), config)?;
    session.start()?;

    let started = Instant::now();
    let mut state = ScanState::Running;
    while !state.is_terminal() && started.elapsed() < duration {
        std::thread::sleep(interval);
        state = session.poll()?;
        let status = session.status();
        println!("--- {:?}, {} elements transferred, cursor at {}",
            state, status.total_transferred, status.cursor);
        print_window(&session.window(depth)?, &channels);
    }
    let state = session.stop()?;
    if let ScanState::Errored(code) = state {
        eprintln!("scan failed: {}", code);
    }
    println!("--- final ({:?})", state);
    print_window(&session.window(depth)?, &channels);
    Ok(())
}
