use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;
use std::fmt;

/// A major-unit amount held exactly as `whole + fraction / ratio`.
#[derive(Debug, Clone, Copy)]
pub struct MajorAmount {
    whole: u64,
    fraction: u64,
    ratio: u64,
}

impl PartialEq for MajorAmount {
    fn eq(&self, other: &Self) -> bool {
        self.whole == other.whole
            && u128::from(self.fraction) * u128::from(other.ratio)
                == u128::from(other.fraction) * u128::from(self.ratio)
    }
}

impl Eq for MajorAmount {}

impl MajorAmount {
    pub fn from_whole(whole: u64) -> Self {
        Self {
            whole,
            fraction: 0,
            ratio: 1,
        }
    }

    /// Parses decimal text such as `"2500"` or `"10.50"`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (whole, fraction) = match text.split_once('.') {
            Some((w, f)) => (w, f),
            None => (text, ""),
        };
        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if !fraction.bytes().all(|b| b.is_ascii_digit()) || fraction.len() > 18 {
            return None;
        }
        let whole = whole.parse().ok()?;
        if fraction.is_empty() {
            return Some(Self::from_whole(whole));
        }
        Some(Self {
            whole,
            fraction: fraction.parse().ok()?,
            ratio: 10u64.pow(fraction.len() as u32),
        })
    }

    pub fn whole(&self) -> u64 {
        self.whole
    }

    pub fn fraction(&self) -> u64 {
        self.fraction
    }

    pub fn is_whole(&self) -> bool {
        self.fraction == 0
    }

    fn fraction_digits(&self) -> usize {
        let mut digits = 0;
        let mut ratio = self.ratio;
        while ratio > 1 {
            ratio /= 10;
            digits += 1;
        }
        digits
    }

    /// Renders with Indian digit grouping (`1,00,000`) as the site does.
    pub fn grouped(&self) -> String {
        let digits = self.whole.to_string();
        let grouped = if digits.len() <= 3 {
            digits
        } else {
            let (head, tail) = digits.split_at(digits.len() - 3);
            let mut parts: Vec<String> = Vec::new();
            let mut rest = head;
            while rest.len() > 2 {
                let (front, back) = rest.split_at(rest.len() - 2);
                parts.push(back.to_string());
                rest = front;
            }
            parts.push(rest.to_string());
            parts.reverse();
            format!("{},{}", parts.join(","), tail)
        };

        if self.is_whole() {
            grouped
        } else {
            format!("{}.{:0width$}", grouped, self.fraction, width = self.fraction_digits())
        }
    }
}

impl fmt::Display for MajorAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_whole() {
            write!(f, "{}", self.whole)
        } else {
            write!(f, "{}.{:0width$}", self.whole, self.fraction, width = self.fraction_digits())
        }
    }
}

/// Whole amounts serialize as integers. Fractional amounts go out as the
/// exact decimal text in number position, so no float ever carries them.
impl Serialize for MajorAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.is_whole() {
            serializer.serialize_u64(self.whole)
        } else {
            RawValue::from_string(self.to_string())
                .map_err(serde::ser::Error::custom)?
                .serialize(serializer)
        }
    }
}

/// Reads the raw JSON token, so large fractional amounts never pass through
/// `f64`. Quoted decimals are accepted too.
impl<'de> Deserialize<'de> for MajorAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Box::<RawValue>::deserialize(deserializer)?;
        let text = raw.get().trim();
        let text = text
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .unwrap_or(text);
        MajorAmount::parse(text)
            .ok_or_else(|| de::Error::custom(format!("invalid amount {:?}", raw.get())))
    }
}

/// Exact conversion from minor units. `ratio` must be non-zero.
pub fn convert_minor_to_major(amount_minor: u64, ratio: u64) -> MajorAmount {
    MajorAmount {
        whole: amount_minor / ratio,
        fraction: amount_minor % ratio,
        ratio,
    }
}

/// `None` when the result does not fit in `u64`.
pub fn convert_major_to_minor(amount_major: u64, ratio: u64) -> Option<u64> {
    amount_major.checked_mul(ratio)
}
