//! Enrichment for the shipment details spreadsheet.
//!
//! Expected record layout:
//!
//! ```json
//! {
//!   "company": { "name": "...", "street": "...", "image": "<base64>" },
//!   "partner": { "name": "...", "phone": "...", "parent": { ... } },
//!   "lines": [
//!     { "package": { "name": "PACK-1", "shipping_weight": 2.5 },
//!       "product": { "name": "..." },
//!       "lot": { "name": "LOT-7" } }
//!   ]
//! }
//! ```
//!
//! `state` and `country` may be given as plain text or as `{ "name": ... }`.

use std::collections::BTreeMap;

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::helpers::{falsy_as_none, join_non_empty, lenient_string};
use super::{ContextEnricher, ContextError, RenderContext, COMPANY_KEY, RECORD_KEY};
use crate::media::{decode_base64_image, render_barcode, widen_image, BarcodeOptions, Symbology};

pub const TEMPLATE_NAME: &str = "ShipmentDetails.xlsx";

const LOGO_WIDEN_FACTOR: f64 = 3.5;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Partner {
    #[serde(deserialize_with = "lenient_string")]
    name: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    street: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    city: Option<String>,
    #[serde(deserialize_with = "display_name")]
    state: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    zip: Option<String>,
    #[serde(deserialize_with = "display_name")]
    country: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    phone: Option<String>,
    #[serde(deserialize_with = "falsy_as_none")]
    parent: Option<Box<Partner>>,
    #[serde(deserialize_with = "lenient_string")]
    image: Option<String>,
}

impl Partner {
    fn address(&self) -> String {
        join_non_empty([
            self.street.as_deref(),
            self.city.as_deref(),
            self.state.as_deref(),
            self.zip.as_deref(),
            self.country.as_deref(),
        ])
    }

    fn logo(&self) -> Option<&str> {
        self.image.as_deref().filter(|data| !data.trim().is_empty())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ShipmentRecord {
    #[serde(deserialize_with = "falsy_as_none")]
    company: Option<Partner>,
    #[serde(deserialize_with = "falsy_as_none")]
    partner: Option<Partner>,
    lines: Vec<ShipmentLine>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ShipmentLine {
    #[serde(deserialize_with = "falsy_as_none")]
    package: Option<Package>,
    #[serde(deserialize_with = "display_name")]
    product: Option<String>,
    #[serde(deserialize_with = "display_name")]
    lot: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Package {
    #[serde(deserialize_with = "lenient_string")]
    name: Option<String>,
    shipping_weight: Value,
}

/// Accepts `"Latvia"`, `{"name": "Latvia"}`, `false` or `null`.
fn display_name<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null | Value::Bool(false) => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Object(map) => match map.get("name") {
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            _ => Ok(None),
        },
        other => Err(de::Error::custom(format!("expected a name, got {other}"))),
    }
}

/// Derives the address lines, package table and widened company logo used
/// by the shipment details spreadsheet.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShipmentDetails;

impl ShipmentDetails {
    fn parse<T: DeserializeOwned + Default>(
        value: Option<&Value>,
        index: usize,
    ) -> Result<T, ContextError> {
        match value {
            None | Some(Value::Null) | Some(Value::Bool(false)) => Ok(T::default()),
            Some(value) => {
                T::deserialize(value).map_err(|source| ContextError::InvalidRecord {
                    template: TEMPLATE_NAME.to_string(),
                    index,
                    source,
                })
            }
        }
    }
}

impl ContextEnricher for ShipmentDetails {
    fn enrich(&self, context: &mut RenderContext, index: usize) -> Result<(), ContextError> {
        let record: ShipmentRecord = Self::parse(context.get(RECORD_KEY), index)?;
        let fallback: Partner = Self::parse(context.get(COMPANY_KEY), index)?;

        let sender = record.company.as_ref().unwrap_or(&fallback);
        context.insert("partner_address", sender.address());

        let partner = record.partner.unwrap_or_default();
        let parent = partner.parent.as_deref();
        context.insert(
            "recipient_data",
            join_non_empty([
                parent.and_then(|p| p.name.as_deref()),
                partner.name.as_deref(),
                parent.and_then(|p| p.phone.as_deref()),
            ]),
        );
        context.insert(
            "recipient_address",
            join_non_empty([
                partner.name.as_deref(),
                partner.street.as_deref(),
                partner.city.as_deref(),
                partner.state.as_deref(),
                partner.zip.as_deref(),
                partner.country.as_deref(),
                partner.phone.as_deref(),
            ]),
        );

        context.insert("packages", group_packages(record.lines)?);

        let logo = record
            .company
            .as_ref()
            .and_then(Partner::logo)
            .or_else(|| fallback.logo());
        let image = match logo {
            Some(encoded) => {
                let raw = decode_base64_image(encoded)?;
                widen_image(&raw, LOGO_WIDEN_FACTOR)?.to_value()
            }
            None => Value::Null,
        };
        context.insert("image", image);
        Ok(())
    }
}

/// Groups lines by package name. Keys come out sorted; lines keep record order.
fn group_packages(lines: Vec<ShipmentLine>) -> Result<Value, ContextError> {
    let mut packages: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    let options = BarcodeOptions::default();

    for line in lines {
        let package = line.package.unwrap_or_default();
        let barcode = match line.lot.as_deref().filter(|lot| !lot.trim().is_empty()) {
            Some(lot) => render_barcode(lot, Symbology::Code39, &options)?.to_value(),
            None => Value::Null,
        };
        packages
            .entry(package.name.clone().unwrap_or_default())
            .or_default()
            .push(json!({
                "package_name": package.name,
                "package_weight": package.shipping_weight,
                "product_name": line.product,
                "lot_name": line.lot,
                "barcode": barcode,
            }));
    }

    let packages: Map<String, Value> = packages
        .into_iter()
        .map(|(name, lines)| (name, Value::Array(lines)))
        .collect();
    Ok(Value::Object(packages))
}
