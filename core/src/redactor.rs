//! PII redaction applied to every outward payload and persisted trace.
//!
//! RULE: nothing leaves the engine — event stream, trace storage, action
//! responses — without passing through these functions. All of them are
//! pure and idempotent: `redact(redact(x)) = redact(x)`.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use std::borrow::Cow;

const PAN_PLACEHOLDER: &str = "[REDACTED-PAN]";
const PHONE_PLACEHOLDER: &str = "[REDACTED-PHONE]";

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([A-Za-z0-9._%+-]+)@([A-Za-z0-9.-]+\.[A-Za-z]{2,})").unwrap()
});

// Standard 3-3-4 phone layout with an optional country prefix. The final
// separator is required so bare digit runs are left to the PAN pass.
static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+?[0-9]{1,3}[-. ])?\(?[0-9]{3}\)?[-. ]?[0-9]{3}[-. ][0-9]{4}\b").unwrap()
});

/// Redact one string. Returns a borrowed value when nothing matched, so the
/// clean path allocates nothing.
pub fn redact_str(input: &str) -> Cow<'_, str> {
    let mut out = Cow::Borrowed(input);

    if EMAIL_RE.is_match(&out) {
        let replaced = EMAIL_RE
            .replace_all(&out, |caps: &Captures| {
                let local: String = caps[1].chars().take(2).collect();
                format!("{local}***@{}", &caps[2])
            })
            .into_owned();
        out = Cow::Owned(replaced);
    }

    if let Some(masked) = mask_pan_runs(&out) {
        out = Cow::Owned(masked);
    }

    if PHONE_RE.is_match(&out) {
        let replaced = PHONE_RE.replace_all(&out, PHONE_PLACEHOLDER).into_owned();
        out = Cow::Owned(replaced);
    }

    out
}

/// Mask a customer identifier: first 4 + `***` + last 2 characters, or a
/// fixed placeholder when shorter than 8. Already-masked values pass through.
pub fn mask_customer_id(id: &str) -> String {
    if id.contains("***") {
        return id.to_string();
    }
    let chars: Vec<char> = id.chars().collect();
    if chars.len() < 8 {
        return "***masked***".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}***{tail}")
}

/// Redact every string leaf of a JSON value in place. Map entries keyed
/// `customer_id` additionally get the customer-id mask. Returns whether
/// anything was masked.
pub fn redact_value(value: &mut Value) -> bool {
    match value {
        Value::String(s) => {
            if let Cow::Owned(clean) = redact_str(s) {
                *s = clean;
                true
            } else {
                false
            }
        }
        Value::Array(items) => {
            let mut changed = false;
            for item in items {
                changed |= redact_value(item);
            }
            changed
        }
        Value::Object(map) => {
            let mut changed = false;
            for (key, item) in map.iter_mut() {
                if key == "customer_id" || key == "customerId" {
                    if let Value::String(s) = item {
                        let masked = mask_customer_id(s);
                        if masked != *s {
                            *s = masked;
                            changed = true;
                        }
                        continue;
                    }
                }
                changed |= redact_value(item);
            }
            changed
        }
        _ => false,
    }
}

/// Convenience wrapper: serialize, redact, hand back the cleaned value and
/// whether anything was masked.
pub fn redact_json(value: Value) -> (Value, bool) {
    let mut value = value;
    let masked = redact_value(&mut value);
    (value, masked)
}

/// Replace every contiguous digit run of length 13-19 (a candidate PAN).
/// Returns None when the input contains no such run.
fn mask_pan_runs(input: &str) -> Option<String> {
    fn flush_run(
        out: &mut Option<String>,
        input: &str,
        last_flush: &mut usize,
        start: usize,
        end: usize,
    ) {
        let run_len = end - start;
        if (13..=19).contains(&run_len) {
            let buf = out.get_or_insert_with(|| String::with_capacity(input.len()));
            buf.push_str(&input[*last_flush..start]);
            buf.push_str(PAN_PLACEHOLDER);
            *last_flush = end;
        }
    }

    let mut out: Option<String> = None;
    let mut run_start: Option<usize> = None;
    let mut last_flush = 0;

    for (idx, ch) in input.char_indices() {
        if ch.is_ascii_digit() {
            if run_start.is_none() {
                run_start = Some(idx);
            }
        } else if let Some(start) = run_start.take() {
            flush_run(&mut out, input, &mut last_flush, start, idx);
        }
    }
    if let Some(start) = run_start {
        flush_run(&mut out, input, &mut last_flush, start, input.len());
    }

    if let Some(mut buf) = out {
        buf.push_str(&input[last_flush..]);
        Some(buf)
    } else {
        None
    }
}
