//! Dumps one dummy-device measurement interval as JSON to stdout.
//!
//! The library deliberately has no JSON encoder (see the Non-goals on
//! output formatting); this is the kind of thin text sink a host
//! application is expected to write itself on top of
//! [`Dataset::dump_records`](eml::Dataset::dump_records).
//!
//! Run with `cargo run --example json_sink --no-default-features --features dummy`.

use std::io::{self, Write};

use eml::config::Config;
use eml::registry::Library;
use eml::Dataset;

fn dump_json<W: Write>(dataset: &Dataset, mut out: W) -> io::Result<()> {
    let props = dataset.properties();
    writeln!(out, "{{")?;
    writeln!(out, "  \"device\": \"{}\",", dataset.device_name())?;
    writeln!(out, "  \"elapsed\": {},", dataset.get_elapsed())?;
    writeln!(out, "  \"consumed\": {},", dataset.get_consumed())?;
    writeln!(
        out,
        "  \"factors\": {{\"time\": {}, \"energy\": {}, \"power\": {}}},",
        props.time_factor.0, props.energy_factor.0, props.power_factor.0
    )?;
    writeln!(out, "  \"data\": [")?;

    let mut first = true;
    dataset.dump_records(|ts, energy, power| {
        let delim = if first { ' ' } else { ',' };
        first = false;
        let _ = write!(out, "   {delim}[{ts}");
        if let Some(e) = energy {
            let _ = write!(out, ",{e}");
        }
        if let Some(p) = power {
            let _ = write!(out, ",{p}");
        }
        let _ = writeln!(out, "]");
    });

    writeln!(out, "  ]")?;
    writeln!(out, "}}")
}

fn main() {
    env_logger::init();

    let mut config = Config::default();
    config.rapl.disabled = true;
    config.nvml.disabled = true;
    config.mic.disabled = true;
    config.odroid.disabled = true;
    config.sbpdu.disabled = true;
    config.labee.disabled = true;
    config.pmlib.disabled = true;

    let library = Library::init(&config).expect("library init");
    if library.device_count() == 0 {
        eprintln!("no devices available");
        return;
    }

    library.begin(0).expect("begin");
    std::thread::sleep(std::time::Duration::from_millis(500));
    let dataset = library.end(0).expect("end");

    dump_json(&dataset, io::stdout()).expect("write json");
    library.shutdown().expect("shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_json_emits_a_row_per_sample() {
        let mut config = Config::default();
        config.rapl.disabled = true;
        config.nvml.disabled = true;
        config.mic.disabled = true;
        config.odroid.disabled = true;
        config.sbpdu.disabled = true;
        config.labee.disabled = true;
        config.pmlib.disabled = true;
        config.dummy.sampling_interval_nanos = 10_000_000;

        let library = Library::init(&config).unwrap();
        library.begin(0).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(150));
        let dataset = library.end(0).unwrap();
        assert!(dataset.count() > 0);

        let mut buf = Vec::new();
        dump_json(&dataset, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("\"device\": \"dummy-0\""));
        assert!(text.contains("\"data\": ["));
        library.shutdown().unwrap();
    }
}
