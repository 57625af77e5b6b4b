//! Output formatting for CLI operations.

use serde_json::json;

use seastitch::PayloadName;

/// One payload slot's name and size, as reported by `list`/`verify`.
pub struct SlotInfo {
    pub name: PayloadName,
    pub size: usize,
}

/// Trait for output formatting, mirroring the human/JSON split every
/// subcommand's result goes through.
pub trait OutputFormatter {
    fn format_list(&self, format_name: &str, slots: &[SlotInfo]) -> String;
    fn format_extract(&self, name: PayloadName, out_path: &str, size: usize) -> String;
    fn format_verify(&self, name: PayloadName, present: bool, size: usize) -> String;
    fn format_inject(&self, out_path: &str, slots: &[SlotInfo]) -> String;
}

/// Human-readable output formatter.
pub struct HumanFormatter;

impl OutputFormatter for HumanFormatter {
    fn format_list(&self, format_name: &str, slots: &[SlotInfo]) -> String {
        let mut out = String::new();
        out.push_str(&format!("format: {format_name}\n"));
        if slots.is_empty() {
            out.push_str("(no payload slots present)\n");
            return out;
        }
        out.push_str(&format!("{:>12}  {}\n", "size", "slot"));
        out.push_str(&"-".repeat(40));
        out.push('\n');
        for slot in slots {
            out.push_str(&format!(
                "{:>12}  {}\n",
                humanize_bytes(slot.size as u64),
                slot.name.as_str()
            ));
        }
        out
    }

    fn format_extract(&self, name: PayloadName, out_path: &str, size: usize) -> String {
        format!(
            "extracted {} ({}) to {out_path}\n",
            name.as_str(),
            humanize_bytes(size as u64)
        )
    }

    fn format_verify(&self, name: PayloadName, present: bool, size: usize) -> String {
        if present {
            format!("{}: present ({})\n", name.as_str(), humanize_bytes(size as u64))
        } else {
            format!("{}: absent\n", name.as_str())
        }
    }

    fn format_inject(&self, out_path: &str, slots: &[SlotInfo]) -> String {
        let mut out = format!("wrote {out_path}\n");
        for slot in slots {
            out.push_str(&format!(
                "  {} ({})\n",
                slot.name.as_str(),
                humanize_bytes(slot.size as u64)
            ));
        }
        out
    }
}

/// JSON output formatter, for scripted callers (`--format json`).
pub struct JsonFormatter;

impl OutputFormatter for JsonFormatter {
    fn format_list(&self, format_name: &str, slots: &[SlotInfo]) -> String {
        let entries: Vec<_> = slots
            .iter()
            .map(|s| json!({"name": s.name.as_str(), "size": s.size}))
            .collect();
        json!({"format": format_name, "slots": entries}).to_string()
    }

    fn format_extract(&self, name: PayloadName, out_path: &str, size: usize) -> String {
        json!({"name": name.as_str(), "path": out_path, "size": size}).to_string()
    }

    fn format_verify(&self, name: PayloadName, present: bool, size: usize) -> String {
        json!({"name": name.as_str(), "present": present, "size": size}).to_string()
    }

    fn format_inject(&self, out_path: &str, slots: &[SlotInfo]) -> String {
        let entries: Vec<_> = slots
            .iter()
            .map(|s| json!({"name": s.name.as_str(), "size": s.size}))
            .collect();
        json!({"path": out_path, "slots": entries}).to_string()
    }
}

fn humanize_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[0])
    } else {
        format!("{size:.2} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn humanize_bytes_formats_units() {
        assert_eq!(humanize_bytes(512), "512 B");
        assert_eq!(humanize_bytes(2048), "2.00 KiB");
    }
}
