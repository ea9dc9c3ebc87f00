/// Parses a Transfermarkt market value into whole euros.
///
/// Handles the German site format (`"12,50 Mio. €"`, `"500 Tsd. €"`) and the
/// English one (`"€12.50m"`, `"€500k"`, `"€1.20bn"`). Placeholders such as `"-"`
/// yield `None`.
pub fn parse_market_value(raw: &str) -> Option<u64> {
    let s = raw.trim();
    if s.is_empty() || s == "-" || s == "—" || s == "?" {
        return None;
    }

    let lower = s.to_lowercase();
    let german = lower.contains("mio") || lower.contains("tsd") || lower.contains("mrd");
    let multiplier = if lower.contains("mrd") || lower.contains("bn") {
        1_000_000_000.0
    } else if lower.contains("mio") || lower.ends_with('m') {
        1_000_000.0
    } else if lower.contains("tsd") || lower.ends_with('k') {
        1_000.0
    } else {
        1.0
    };

    let digits: String = lower
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if digits.is_empty() {
        return None;
    }

    // German: '.' groups thousands, ',' is the decimal mark. English: the reverse.
    let normalized = if german || single_decimal_comma(&digits) {
        digits.replace('.', "").replace(',', ".")
    } else {
        digits.replace(',', "")
    };
    let value = normalized.parse::<f64>().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * multiplier).round() as u64)
}

// "7,5" is a decimal comma; "7,500" is a thousands separator.
fn single_decimal_comma(digits: &str) -> bool {
    if digits.contains('.') || digits.matches(',').count() != 1 {
        return false;
    }
    digits.rsplit(',').next().is_some_and(|tail| tail.len() != 3)
}

/// Short human form used in exported sheets: `12.5M €` or `500.0k €`.
pub fn format_market_value(value: u64) -> String {
    if value > 1_000_000 {
        format!("{:.1}M €", value as f64 / 1_000_000.0)
    } else {
        format!("{:.1}k €", value as f64 / 1_000.0)
    }
}
