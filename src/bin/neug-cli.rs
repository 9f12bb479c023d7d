//! Thin diagnostic wrapper around the `neug` driver: print random words,
//! report health-test counters, and exercise a mode switch. This binary
//! carries no entropy-pipeline logic of its own; it only wires the public
//! API to a terminal.

use clap::{App, Arg, SubCommand};
use neug::adc::NoiseAdc;
use neug::device_id::FixedDeviceId;
use neug::{Mode, Neug, NeugConfig};

fn build_engine(ring_size: u8) -> Neug {
    let config = NeugConfig {
        ring_size,
        initial_mode: Mode::Conditioned,
        adc: Box::new(NoiseAdc::default()),
        device_id: Box::new(FixedDeviceId([0; 20])),
    };
    Neug::new(config).expect("failed to start neug engine")
}

fn main() {
    env_logger::init();

    let matches = App::new("neug-cli")
        .about("Diagnostic CLI for the neug TRNG driver")
        .arg(Arg::with_name("ring-size").long("ring-size").takes_value(true).default_value("32"))
        .subcommand(
            SubCommand::with_name("words")
                .about("print N freshly generated 32-bit words")
                .arg(Arg::with_name("count").takes_value(true).default_value("8")),
        )
        .subcommand(SubCommand::with_name("bytes").about("print N random bytes as hex").arg(
            Arg::with_name("count").takes_value(true).default_value("32"),
        ))
        .subcommand(SubCommand::with_name("salt").about("print an 8-byte salt"))
        .subcommand(SubCommand::with_name("health").about("report health-test counters"))
        .subcommand(
            SubCommand::with_name("mode")
                .about("switch operating mode and print the first word after the switch")
                .arg(Arg::with_name("mode").takes_value(true).possible_values(&[
                    "conditioned",
                    "raw",
                    "raw-data",
                ])),
        )
        .get_matches();

    let ring_size: u8 = matches.value_of("ring-size").unwrap().parse().expect("invalid ring size");
    let mut neug = build_engine(ring_size);

    match matches.subcommand() {
        ("words", Some(sub)) => {
            let count: usize = sub.value_of("count").unwrap().parse().expect("invalid count");
            for _ in 0..count {
                println!("{:#010x}", neug.get(true));
            }
        }
        ("bytes", Some(sub)) => {
            let count: usize = sub.value_of("count").unwrap().parse().expect("invalid count");
            let mut buf = vec![0u8; count];
            neug.next_bytes(&mut buf);
            println!("{}", buf.iter().map(|b| format!("{b:02x}")).collect::<String>());
        }
        ("salt", _) => {
            let salt = neug.next_salt();
            println!("{}", salt.iter().map(|b| format!("{b:02x}")).collect::<String>());
        }
        ("health", _) => {
            println!("mode:          {:?}", neug.mode());
            println!("err_state:     {:?}", neug.err_state());
            println!("err_cnt:       {}", neug.err_cnt());
            println!("err_cnt_rc:    {}", neug.err_cnt_rc());
            println!("err_cnt_p64:   {}", neug.err_cnt_p64());
            println!("err_cnt_p4k:   {}", neug.err_cnt_p4k());
            println!("rc_max:        {}", neug.rc_max());
            println!("p64_max:       {}", neug.p64_max());
            println!("p4k_max:       {}", neug.p4k_max());
        }
        ("mode", Some(sub)) => {
            let mode = match sub.value_of("mode").unwrap() {
                "conditioned" => Mode::Conditioned,
                "raw" => Mode::Raw,
                "raw-data" => Mode::RawData,
                _ => unreachable!(),
            };
            neug.mode_select(mode);
            println!("{:#010x}", neug.get(true));
        }
        _ => {
            for _ in 0..8 {
                println!("{:#010x}", neug.get(true));
            }
        }
    }

    neug.fini();
}
