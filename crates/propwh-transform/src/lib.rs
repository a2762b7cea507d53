//! Sub-record aggregation and per-record dimension assembly.
//!
//! Every function here is pure: a record goes in, attribute sets come out.

use std::cmp::Ordering;

use chrono::NaiveDate;
use propwh_core::normalize::{first_max, flag_is_yes, hash_key, is_blank, parse_number, scalar_text};
use propwh_core::{
    AttributeSet, Dimension, HoaCandidate, Number, PropertyRecord, RehabCandidate, Scalar,
    SqlValue, ValuationCandidate,
};
use serde::Serialize;
use serde_json::json;

pub const CRATE_NAME: &str = "propwh-transform";

pub const COMPOSITE_PROVIDER: &str = "composite";
pub const DEFAULT_COUNTRY: &str = "USA";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValuationAggregate {
    pub provider: String,
    pub estimate: Option<Number>,
    pub estimate_low: Option<Number>,
    pub estimate_high: Option<Number>,
    /// No provider date is consumed yet, so this stays `None`.
    pub as_of_date: Option<NaiveDate>,
}

impl ValuationAggregate {
    pub fn to_attributes(&self) -> AttributeSet {
        AttributeSet::new()
            .with("provider", self.provider.as_str())
            .with("estimate", self.estimate)
            .with("estimate_low", self.estimate_low)
            .with("estimate_high", self.estimate_high)
            .with("as_of_date", self.as_of_date)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoaAggregate {
    pub name: Option<String>,
    pub monthly_fee: Option<Number>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub rules: Option<serde_json::Value>,
}

impl HoaAggregate {
    pub fn to_attributes(&self) -> AttributeSet {
        AttributeSet::new()
            .with("hoa_name", self.name.clone())
            .with("hoa_monthly_fee", self.monthly_fee)
            .with("hoa_phone", self.phone.clone())
            .with("hoa_email", self.email.clone())
            .with("rules_json", self.rules.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RehabAggregate {
    pub total_estimate: Option<Number>,
    pub exterior: Option<f64>,
    pub interior: Option<f64>,
    pub systems: Option<f64>,
    pub as_of_date: Option<NaiveDate>,
}

impl RehabAggregate {
    pub fn to_attributes(&self) -> AttributeSet {
        AttributeSet::new()
            .with("total_estimate", self.total_estimate)
            .with("exterior", self.exterior)
            .with("interior", self.interior)
            .with("systems", self.systems)
            .with("as_of_date", self.as_of_date)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxAggregate {
    pub tax_year: Option<i64>,
    pub assessed_value: Option<Number>,
    pub tax_amount: Option<Number>,
}

impl TaxAggregate {
    pub fn to_attributes(&self) -> AttributeSet {
        AttributeSet::new()
            .with("tax_year", self.tax_year)
            .with("assessed_value", self.assessed_value)
            .with("tax_amount", self.tax_amount)
    }
}

/// Priced fields of a valuation candidate, highest priority first.
fn priced_fields(candidate: &ValuationCandidate) -> [Option<&Scalar>; 4] {
    [
        candidate.redfin_value.as_ref(),
        candidate.zestimate.as_ref(),
        candidate.arv.as_ref(),
        candidate.list_price.as_ref(),
    ]
}

/// Highest-priority non-blank priced field and its rank (4 = top, 1 = lowest).
fn top_priced_field(candidate: &ValuationCandidate) -> Option<(u8, &Scalar)> {
    let fields = priced_fields(candidate);
    let total = fields.len() as u8;
    fields
        .into_iter()
        .enumerate()
        .find(|(_, value)| !is_blank(*value))
        .and_then(|(idx, value)| value.map(|v| (total - idx as u8, v)))
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ValuationScore {
    rank: u8,
    value: Option<f64>,
}

impl ValuationScore {
    fn of(candidate: &ValuationCandidate) -> Self {
        match top_priced_field(candidate) {
            Some((rank, value)) => Self {
                rank,
                value: parse_number(Some(value)).map(Number::as_f64),
            },
            None => Self {
                rank: 0,
                value: Some(0.0),
            },
        }
    }

    fn compare(&self, other: &Self) -> Ordering {
        self.rank.cmp(&other.rank).then_with(|| match (self.value, other.value) {
            (Some(a), Some(b)) => a.total_cmp(&b),
            (a, b) => a.is_some().cmp(&b.is_some()),
        })
    }
}

/// Pick one valuation per property.
///
/// Priority is `Redfin_Value > Zestimate > ARV > List_Price`; a candidate is
/// scored by its best field's rank, then that field's value. The first
/// candidate wins an exact tie.
pub fn best_valuation(candidates: Option<&[ValuationCandidate]>) -> Option<ValuationAggregate> {
    let (first, rest) = candidates?.split_first()?;

    let mut best = first;
    let mut best_score = ValuationScore::of(first);
    for candidate in rest {
        let score = ValuationScore::of(candidate);
        if score.compare(&best_score) == Ordering::Greater {
            best = candidate;
            best_score = score;
        }
    }

    Some(ValuationAggregate {
        provider: COMPOSITE_PROVIDER.to_string(),
        estimate: top_priced_field(best).and_then(|(_, value)| parse_number(Some(value))),
        estimate_low: parse_number(best.low_fmr.as_ref()),
        estimate_high: parse_number(best.high_fmr.as_ref()),
        as_of_date: None,
    })
}

/// Collapse HOA sub-records: highest fee, plus an `any_hoa` marker when any flag says yes.
pub fn aggregate_hoa(candidates: Option<&[HoaCandidate]>) -> Option<HoaAggregate> {
    let candidates = candidates.filter(|c| !c.is_empty())?;

    let monthly_fee = first_max(
        candidates
            .iter()
            .filter(|c| !is_blank(c.fee.as_ref()))
            .filter_map(|c| parse_number(c.fee.as_ref())),
    );
    let any_hoa = candidates.iter().any(|c| flag_is_yes(c.flag.as_ref()));

    Some(HoaAggregate {
        name: None,
        monthly_fee,
        phone: None,
        email: None,
        rules: any_hoa.then(|| json!({ "any_hoa": true })),
    })
}

fn any_yes(flags: &[Option<&Scalar>]) -> bool {
    flags.iter().any(|flag| flag_is_yes(*flag))
}

/// Collapse rehab sub-records: highest total (calculation, else underwriting)
/// and one point per sub-record for each category it touches.
pub fn aggregate_rehab(candidates: Option<&[RehabCandidate]>) -> Option<RehabAggregate> {
    let candidates = candidates.filter(|c| !c.is_empty())?;

    let mut totals = Vec::with_capacity(candidates.len());
    let mut exterior = 0.0;
    let mut interior = 0.0;
    let mut systems = 0.0;

    for rehab in candidates {
        let total = if is_blank(rehab.rehab_calculation.as_ref()) {
            rehab.underwriting_rehab.as_ref()
        } else {
            rehab.rehab_calculation.as_ref()
        };
        totals.extend(parse_number(total));

        if any_yes(&[rehab.roof_flag.as_ref(), rehab.windows_flag.as_ref()]) {
            exterior += 1.0;
        }
        if any_yes(&[
            rehab.kitchen_flag.as_ref(),
            rehab.bathroom_flag.as_ref(),
            rehab.paint_flag.as_ref(),
        ]) {
            interior += 1.0;
        }
        if any_yes(&[rehab.hvac_flag.as_ref(), rehab.foundation_flag.as_ref()]) {
            systems += 1.0;
        }
    }

    Some(RehabAggregate {
        total_estimate: first_max(totals),
        exterior: non_zero(exterior),
        interior: non_zero(interior),
        systems: non_zero(systems),
        as_of_date: None,
    })
}

// A zero category score is stored as NULL.
fn non_zero(score: f64) -> Option<f64> {
    (score != 0.0).then_some(score)
}

/// Tax row from the flat `Taxes` field; `None` when the field is blank.
pub fn tax_from_amount(taxes: Option<&Scalar>) -> Option<TaxAggregate> {
    if is_blank(taxes) {
        return None;
    }
    Some(TaxAggregate {
        tax_year: None,
        assessed_value: None,
        tax_amount: parse_number(taxes),
    })
}

/// Run-wide values the assembler falls back to.
#[derive(Debug, Clone, PartialEq)]
pub struct AssemblyDefaults {
    pub country: String,
    pub epoch_fallback: NaiveDate,
}

impl Default for AssemblyDefaults {
    fn default() -> Self {
        Self {
            country: DEFAULT_COUNTRY.to_string(),
            // 1970-01-01
            epoch_fallback: NaiveDate::default(),
        }
    }
}

/// Normalized, aggregated view of one input record, ready for key resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotDraft {
    pub property_bk: String,
    pub property: AttributeSet,
    pub address: AttributeSet,
    pub hoa: Option<AttributeSet>,
    pub valuation: Option<AttributeSet>,
    pub rehab: Option<AttributeSet>,
    pub tax: Option<AttributeSet>,
    pub effective_date: NaiveDate,
}

impl SnapshotDraft {
    /// Attribute set to resolve for `dimension`, if that dimension is attempted.
    pub fn attributes_for(&self, dimension: Dimension) -> Option<&AttributeSet> {
        match dimension {
            Dimension::Property => Some(&self.property),
            Dimension::Address => Some(&self.address),
            Dimension::Hoa => self.hoa.as_ref(),
            Dimension::Valuation => self.valuation.as_ref(),
            Dimension::Rehab => self.rehab.as_ref(),
            Dimension::Tax => self.tax.as_ref(),
        }
    }
}

pub fn property_business_key(record: &PropertyRecord) -> String {
    hash_key(&[
        scalar_text(record.street_address.as_ref()),
        scalar_text(record.city.as_ref()),
        scalar_text(record.state.as_ref()),
        scalar_text(record.zip.as_ref()),
    ])
}

fn non_empty_attributes(attrs: AttributeSet) -> Option<AttributeSet> {
    attrs.has_any_value().then_some(attrs)
}

pub fn assemble_snapshot(record: &PropertyRecord, defaults: &AssemblyDefaults) -> SnapshotDraft {
    let property_bk = property_business_key(record);

    let property = AttributeSet::new()
        .with("property_bk", property_bk.as_str())
        .with("year_built", parse_number(record.year_built.as_ref()))
        .with("property_type", scalar_text(record.property_type.as_ref()))
        .with("square_feet", parse_number(record.sqft_total.as_ref()))
        .with("bedrooms", parse_number(record.bedrooms.as_ref()))
        .with("bathrooms", parse_number(record.bathrooms.as_ref()))
        .with("lot_size_sqft", SqlValue::Null);

    let country = if is_blank(record.country.as_ref()) {
        Some(defaults.country.clone())
    } else {
        scalar_text(record.country.as_ref())
    };
    let address = AttributeSet::new()
        .with("address_line1", scalar_text(record.street_address.as_ref()))
        .with("address_line2", SqlValue::Null)
        .with("city", scalar_text(record.city.as_ref()))
        .with("state", scalar_text(record.state.as_ref()))
        .with("postal_code", scalar_text(record.zip.as_ref()))
        .with("county", SqlValue::Null)
        .with("country", country)
        .with("latitude", parse_number(record.latitude.as_ref()))
        .with("longitude", parse_number(record.longitude.as_ref()));

    let hoa = aggregate_hoa(record.hoa.as_deref());
    let valuation = best_valuation(record.valuations.as_deref());
    let rehab = aggregate_rehab(record.rehab.as_deref());
    let tax = tax_from_amount(record.taxes.as_ref());

    let effective_date = valuation
        .as_ref()
        .and_then(|v| v.as_of_date)
        .or_else(|| rehab.as_ref().and_then(|r| r.as_of_date))
        .unwrap_or(defaults.epoch_fallback);

    SnapshotDraft {
        property_bk,
        property,
        address,
        hoa: hoa.map(|h| h.to_attributes()).and_then(non_empty_attributes),
        valuation: valuation
            .map(|v| v.to_attributes())
            .and_then(non_empty_attributes),
        rehab: rehab.map(|r| r.to_attributes()).and_then(non_empty_attributes),
        tax: tax.map(|t| t.to_attributes()).and_then(non_empty_attributes),
        effective_date,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: &str) -> Option<Scalar> {
        Some(Scalar::from(value))
    }

    fn valuation(field: &str, value: Scalar) -> ValuationCandidate {
        let mut candidate = ValuationCandidate::default();
        match field {
            "Redfin_Value" => candidate.redfin_value = Some(value),
            "Zestimate" => candidate.zestimate = Some(value),
            "ARV" => candidate.arv = Some(value),
            "List_Price" => candidate.list_price = Some(value),
            other => panic!("unknown valuation field {other}"),
        }
        candidate
    }

    #[test]
    fn higher_priority_field_wins_regardless_of_order() {
        let list_price = valuation("List_Price", Scalar::Int(100));
        let zestimate = valuation("Zestimate", Scalar::Int(200));

        let forward = best_valuation(Some(&[list_price.clone(), zestimate.clone()])).unwrap();
        let reverse = best_valuation(Some(&[zestimate, list_price])).unwrap();

        assert_eq!(forward.estimate, Some(Number::Int(200)));
        assert_eq!(reverse.estimate, Some(Number::Int(200)));
        assert_eq!(forward.provider, COMPOSITE_PROVIDER);
        assert_eq!(forward.as_of_date, None);
    }

    #[test]
    fn same_rank_prefers_larger_value_then_first_occurrence() {
        let mut low = valuation("ARV", Scalar::from("$150,000"));
        low.low_fmr = text("1,100");
        let mut high = valuation("ARV", Scalar::Int(175_000));
        high.low_fmr = text("1,250");
        high.high_fmr = text("1,600");

        let picked = best_valuation(Some(&[low.clone(), high])).unwrap();
        assert_eq!(picked.estimate, Some(Number::Int(175_000)));
        assert_eq!(picked.estimate_low, Some(Number::Int(1250)));
        assert_eq!(picked.estimate_high, Some(Number::Int(1600)));

        let mut twin = low.clone();
        twin.low_fmr = text("999");
        let tied = best_valuation(Some(&[low, twin])).unwrap();
        assert_eq!(tied.estimate_low, Some(Number::Int(1100)));
    }

    #[test]
    fn blank_priced_field_falls_through_to_next_priority() {
        let mut candidate = valuation("Redfin_Value", Scalar::from(" "));
        candidate.list_price = Some(Scalar::Int(90));
        let picked = best_valuation(Some(&[candidate])).unwrap();
        assert_eq!(picked.estimate, Some(Number::Int(90)));
    }

    #[test]
    fn empty_or_missing_valuation_list_yields_none() {
        assert_eq!(best_valuation(None), None);
        assert_eq!(best_valuation(Some(&[])), None);
        let unpriced = best_valuation(Some(&[ValuationCandidate::default()])).unwrap();
        assert_eq!(unpriced.estimate, None);
    }

    #[test]
    fn hoa_takes_max_fee_and_any_yes_flag() {
        let hoa = aggregate_hoa(Some(&[
            HoaCandidate { fee: text("$45"), flag: text("no") },
            HoaCandidate { fee: text("120.5"), flag: text(" Yes") },
            HoaCandidate { fee: text(""), flag: None },
        ]))
        .unwrap();

        assert_eq!(hoa.monthly_fee, Some(Number::Float(120.5)));
        assert_eq!(hoa.rules, Some(json!({ "any_hoa": true })));
        assert_eq!(hoa.name, None);
        assert_eq!(hoa.phone, None);
        assert_eq!(hoa.email, None);
    }

    #[test]
    fn hoa_without_yes_flag_has_no_rules_payload() {
        let hoa = aggregate_hoa(Some(&[HoaCandidate { fee: None, flag: text("No") }])).unwrap();
        assert_eq!(hoa.monthly_fee, None);
        assert_eq!(hoa.rules, None);
        assert!(!hoa.to_attributes().has_any_value());
        assert_eq!(aggregate_hoa(Some(&[])), None);
    }

    #[test]
    fn rehab_scores_one_point_per_sub_record_per_category() {
        let single = RehabCandidate {
            roof_flag: text("Yes"),
            kitchen_flag: text("No"),
            ..Default::default()
        };
        let rehab = aggregate_rehab(Some(&[single])).unwrap();
        assert_eq!(rehab.exterior, Some(1.0));
        assert_eq!(rehab.interior, None);
        assert_eq!(rehab.systems, None);

        let busy = RehabCandidate {
            roof_flag: text("yes"),
            windows_flag: text("yes"),
            hvac_flag: text("YES"),
            ..Default::default()
        };
        let quiet = RehabCandidate {
            paint_flag: text("yes"),
            ..Default::default()
        };
        let rehab = aggregate_rehab(Some(&[busy.clone(), busy, quiet])).unwrap();
        assert_eq!(rehab.exterior, Some(2.0));
        assert_eq!(rehab.interior, Some(1.0));
        assert_eq!(rehab.systems, Some(2.0));
    }

    #[test]
    fn rehab_total_uses_fallback_and_takes_max() {
        let rehab = aggregate_rehab(Some(&[
            RehabCandidate {
                rehab_calculation: text(""),
                underwriting_rehab: text("$32,000"),
                ..Default::default()
            },
            RehabCandidate {
                rehab_calculation: text("25000"),
                underwriting_rehab: text("90000"),
                ..Default::default()
            },
        ]))
        .unwrap();
        assert_eq!(rehab.total_estimate, Some(Number::Int(32_000)));
        assert_eq!(rehab.as_of_date, None);
        assert_eq!(aggregate_rehab(None), None);
    }

    #[test]
    fn tax_only_built_from_non_blank_amount() {
        assert_eq!(tax_from_amount(None), None);
        assert_eq!(tax_from_amount(text("  ").as_ref()), None);
        let tax = tax_from_amount(text("$3,100.25").as_ref()).unwrap();
        assert_eq!(tax.tax_amount, Some(Number::Float(3100.25)));
        assert_eq!(tax.tax_year, None);
    }

    fn sample_record() -> PropertyRecord {
        PropertyRecord {
            street_address: text("123 Main St"),
            city: text("Austin"),
            state: text("TX"),
            zip: Some(Scalar::Int(78701)),
            sqft_total: text("1,850"),
            bedrooms: Some(Scalar::Int(3)),
            bathrooms: Some(Scalar::Float(2.5)),
            ..Default::default()
        }
    }

    #[test]
    fn assembles_property_and_address_with_defaults() {
        let draft = assemble_snapshot(&sample_record(), &AssemblyDefaults::default());

        assert_eq!(
            draft.property_bk,
            hash_key(&[Some("123 main st"), Some("austin"), Some("tx"), Some("78701")])
        );
        assert_eq!(draft.property.get("square_feet"), &SqlValue::Int(1850));
        assert_eq!(draft.address.get("country"), &SqlValue::Text("USA".to_string()));
        assert_eq!(draft.address.get("postal_code"), &SqlValue::Text("78701".to_string()));
        assert_eq!(draft.hoa, None);
        assert_eq!(draft.valuation, None);
        assert_eq!(draft.rehab, None);
        assert_eq!(draft.tax, None);
        assert_eq!(draft.effective_date, NaiveDate::from_ymd_opt(1970, 1, 1).unwrap());
    }

    #[test]
    fn record_country_overrides_default_and_optional_dimensions_attach() {
        let mut record = sample_record();
        record.country = text("CAN");
        record.taxes = text("4,200");
        record.hoa = Some(vec![HoaCandidate { fee: None, flag: text("no") }]);
        record.valuations = Some(vec![ValuationCandidate::default()]);

        let defaults = AssemblyDefaults {
            country: "MEX".to_string(),
            epoch_fallback: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
        };
        let draft = assemble_snapshot(&record, &defaults);

        assert_eq!(draft.address.get("country"), &SqlValue::Text("CAN".to_string()));
        assert_eq!(draft.tax.as_ref().unwrap().get("tax_amount"), &SqlValue::Int(4200));
        // All-null HOA aggregate is not attempted; composite valuation always is.
        assert!(draft.attributes_for(Dimension::Hoa).is_none());
        assert!(draft.attributes_for(Dimension::Valuation).is_some());
        assert_eq!(draft.effective_date, defaults.epoch_fallback);
    }
}
