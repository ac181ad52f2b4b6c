/// Renders remaining turn time as `m:ss` or `h:mm:ss`, rounding seconds up.
pub fn time_with_colons(ms: u64) -> String {
    if ms == 0 {
        return "0:00".to_string();
    }

    let total_seconds = ms.div_ceil(1_000);
    let seconds = total_seconds % 60;
    let total_minutes = total_seconds / 60;
    if total_minutes < 60 {
        return format!("{}:{:02}", total_minutes, seconds);
    }

    format!("{}:{:02}:{:02}", total_minutes / 60, total_minutes % 60, seconds)
}

/// Renders a duration as `1h 2m 3s`, omitting leading zero units.
pub fn ms_to_hms(ms: u64) -> String {
    let total_seconds = ms / 1_000;
    let seconds = total_seconds % 60;
    let minutes = (total_seconds / 60) % 60;
    let hours = total_seconds / 3_600;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{}h ", hours));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{}m ", minutes));
    }
    out.push_str(&format!("{}s", seconds));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colons() {
        assert_eq!(time_with_colons(0), "0:00");
        assert_eq!(time_with_colons(9_001), "0:10");
        assert_eq!(time_with_colons(10_000), "0:10");
        assert_eq!(time_with_colons(61_000), "1:01");
        assert_eq!(time_with_colons(3_600_000), "1:00:00");
        assert_eq!(time_with_colons(3_725_000), "1:02:05");
    }

    #[test]
    fn hms() {
        assert_eq!(ms_to_hms(999), "0s");
        assert_eq!(ms_to_hms(45_000), "45s");
        assert_eq!(ms_to_hms(3_723_000), "1h 2m 3s");
        assert_eq!(ms_to_hms(3_600_000), "1h 0m 0s");
    }
}
