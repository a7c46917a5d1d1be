//! Small formatting and naming helpers shared across the assembler.

/// Format a float the way C's `%g` does with the given number of
/// significant digits: fixed point in the middle range, exponent outside,
/// trailing zeros trimmed.
pub fn fmt_sig(x: f64, sig: usize) -> String {
    if x == 0.0 {
        return "0".to_string();
    }
    if !x.is_finite() {
        return x.to_string();
    }
    let sig = sig.max(1);
    let exp = x.abs().log10().floor() as i32;
    if exp < -4 || exp >= sig as i32 {
        let s = format!("{:.*e}", sig - 1, x);
        trim_exponential(&s)
    } else {
        let decimals = (sig as i32 - 1 - exp).max(0) as usize;
        let s = format!("{:.*}", decimals, x);
        trim_fraction(&s)
    }
}

/// `%g` with the default six significant digits.
pub fn fmt_g(x: f64) -> String {
    fmt_sig(x, 6)
}

fn trim_fraction(s: &str) -> String {
    if !s.contains('.') {
        return s.to_string();
    }
    let s = s.trim_end_matches('0');
    s.trim_end_matches('.').to_string()
}

fn trim_exponential(s: &str) -> String {
    match s.split_once('e') {
        Some((mantissa, exp)) => format!("{}e{}", trim_fraction(mantissa), exp),
        None => s.to_string(),
    }
}

/// Zero-pad the numeric prefix of a series key so that keys sort
/// numerically: `"7b"` becomes `"0007b"`.
pub fn fixser(sno: &str) -> String {
    let digits: String = sno.chars().take_while(|c| c.is_ascii_digit()).collect();
    match digits.parse::<i64>() {
        Ok(n) => format!("{:04}{}", n, &sno[digits.len()..]),
        Err(_) => sno.to_string(),
    }
}

/// Tidy protocol names/descriptions in a uniform way so they can serve as
/// usable file names.
pub fn tidy_protoname(desc: &str) -> String {
    desc.chars()
        .map(|c| {
            if c.is_whitespace() || c == '/' || c == '^' {
                '_'
            } else {
                c
            }
        })
        .filter(|c| c.is_ascii_alphanumeric() || ",.;:=%&()_+-".contains(*c))
        .collect()
}

/// Sub-series labels `a`..`y` in instance order, falling back to `zNNNN`.
pub fn alpha_ser(n: usize) -> String {
    if n <= 24 {
        char::from(b'a' + n as u8).to_string()
    } else {
        z_ser(n)
    }
}

/// Sub-series labels `z0000`, `z0001`, ...
pub fn z_ser(n: usize) -> String {
    format!("z{:04}", n)
}
