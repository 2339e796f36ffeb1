#![no_main]
use libfuzzer_sys::fuzz_target;
use reactor_core::OperatorCommand;
use reactor_core::StatusReport;
use reactor_core::feed::{parse_labels, parse_record};
use reactor_core::spectrum::Spectrum;

// Everything that reads bytes from outside the process: pump replies,
// autosave lines, raw spectra and console input.
fuzz_target!(|data: &[u8]| {
    let _ = StatusReport::decode(data);
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = parse_record(text);
        let _ = parse_labels(text);
        if let Ok(s) = Spectrum::parse(text) {
            let _ = s.render();
        }
        let _ = text.parse::<OperatorCommand>();
    }
});
