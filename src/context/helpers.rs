//! Formatting helpers shared by enrichers and template filters.

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;

use super::words::number_to_words;

/// Reads a numeric template value. `null`, `false`, unparsable strings and
/// non-finite values count as "no value".
pub fn numeric(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(true) => Some(1.0),
        Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    };
    number.filter(|n: &f64| n.is_finite())
}

/// `1234.5 → "1 234,50"`; a missing value renders as `"0,00"`.
pub fn format_money(value: &Value) -> String {
    format_amount(numeric(value).unwrap_or(0.0))
}

/// Two fraction digits, comma decimal separator, thousands grouped with a space.
pub fn format_amount(amount: f64) -> String {
    let fixed = format!("{:.2}", amount);
    let (sign, digits) = match fixed.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", fixed.as_str()),
    };
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (index, ch) in whole.chars().enumerate() {
        if index > 0 && (whole.len() - index) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(ch);
    }

    // "-0,00" reads oddly on an invoice.
    let sign = if grouped.chars().all(|c| c == '0') && fraction == "00" {
        ""
    } else {
        sign
    };
    format!("{sign}{grouped},{fraction}")
}

/// `5.5 → "пять руб. пятьдесят коп."`; a missing value renders as `""`.
pub fn amount_in_words(value: &Value) -> String {
    match numeric(value) {
        Some(amount) => rubles_in_words(amount),
        None => String::new(),
    }
}

/// Whole and fractional parts are spelled independently; kopecks are the
/// fraction rounded to the nearest hundredth, ties to even.
pub fn rubles_in_words(amount: f64) -> String {
    let rubles = amount.trunc();
    let kopecks = ((amount - rubles) * 100.0).round_ties_even();
    format!(
        "{} руб. {} коп.",
        number_to_words(rubles as i64),
        number_to_words(kopecks as i64)
    )
}

/// Joins the non-empty parts with `", "`.
pub fn join_non_empty<'a, I>(parts: I) -> String
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    parts
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Treats `null` and `false` as an absent value, which is how record sources
/// commonly encode empty relations.
pub fn falsy_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match Value::deserialize(deserializer)? {
        Value::Null | Value::Bool(false) => Ok(None),
        other => serde_json::from_value(other).map(Some).map_err(de::Error::custom),
    }
}

/// Like [`falsy_as_none`] for text, also accepting numbers (zip codes, phones).
pub fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null | Value::Bool(false) => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(de::Error::custom(format!("expected text, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_money_literals() {
        assert_eq!(format_money(&json!(false)), "0,00");
        assert_eq!(format_money(&Value::Null), "0,00");
        assert_eq!(format_money(&json!(10)), "10,00");
        assert_eq!(format_money(&json!(1234.5)), "1 234,50");
        assert_eq!(format_money(&json!(1234567.891)), "1 234 567,89");
        assert_eq!(format_money(&json!(999.999)), "1 000,00");
        assert_eq!(format_money(&json!("12.3")), "12,30");
        assert_eq!(format_money(&json!(-1500)), "-1 500,00");
        assert_eq!(format_money(&json!(-0.001)), "0,00");
    }

    #[test]
    fn test_non_finite_strings_are_not_numbers() {
        assert_eq!(numeric(&json!("inf")), None);
        assert_eq!(numeric(&json!("-Infinity")), None);
        assert_eq!(numeric(&json!("NaN")), None);
        assert_eq!(format_money(&json!("inf")), "0,00");
        assert_eq!(numeric(&json!(" 7,5 ")), Some(7.5));
    }

    #[test]
    fn test_amount_in_words() {
        assert_eq!(amount_in_words(&json!(false)), "");
        assert_eq!(amount_in_words(&json!(5.5)), "пять руб. пятьдесят коп.");
        assert_eq!(amount_in_words(&json!(10)), "десять руб. ноль коп.");
        assert_eq!(
            amount_in_words(&json!(1001.15)),
            "одна тысяча один руб. пятнадцать коп."
        );
    }

    #[test]
    fn test_join_non_empty() {
        assert_eq!(
            join_non_empty([Some("Main st"), None, Some(""), Some("Riga")]),
            "Main st, Riga"
        );
        assert_eq!(join_non_empty([None, None]), "");
    }

    #[derive(Debug, Deserialize)]
    struct Sample {
        #[serde(default, deserialize_with = "lenient_string")]
        zip: Option<String>,
        #[serde(default, deserialize_with = "falsy_as_none")]
        parent: Option<Box<Sample>>,
    }

    #[test]
    fn test_lenient_deserializers() {
        let sample: Sample = serde_json::from_value(json!({"zip": 1050, "parent": false})).unwrap();
        assert_eq!(sample.zip.as_deref(), Some("1050"));
        assert!(sample.parent.is_none());

        let nested: Sample =
            serde_json::from_value(json!({"zip": false, "parent": {"zip": "LV-1"}})).unwrap();
        assert!(nested.zip.is_none());
        assert_eq!(nested.parent.unwrap().zip.as_deref(), Some("LV-1"));
    }
}
