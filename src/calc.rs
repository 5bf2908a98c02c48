use crate::core::*;
use crate::models::*;
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::HashMap;
use strum::IntoEnumIterator;

/// Coerces a chart cell to a number. Tolerates numeric strings.
fn coerce(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn row_cell(row: &HashMap<String, Value>, zone: &str) -> Option<f64> {
    if let Some(v) = row.get(zone).and_then(coerce) {
        return Some(v);
    }
    row.iter()
        .find(|(k, _)| norm_zone(k) == norm_zone(zone))
        .and_then(|(_, v)| coerce(v))
}

fn cell(chart: &PriceChart, from: &str, to: &str) -> Option<f64> {
    chart.get(from).and_then(|row| row_cell(row, to))
}

/// Resolves the unit rate for a zone pair.
///
/// Tries both orientations, then falls back to a case-insensitive scan of
/// the top-level keys. Returns None when the vendor cannot price the route.
pub fn unit_price(chart: &PriceChart, origin: &str, dest: &str) -> Option<f64> {
    let o = norm_zone(origin);
    let d = norm_zone(dest);

    if let Some(v) = cell(chart, &o, &d) {
        return Some(v);
    }
    if let Some(v) = cell(chart, &d, &o) {
        return Some(v);
    }

    for (key, row) in chart {
        let key = norm_zone(key);
        if key == o {
            if let Some(v) = row_cell(row, &d).or_else(|| row_cell(row, dest)) {
                return Some(v);
            }
        }
        if key == d {
            if let Some(v) = row_cell(row, &o).or_else(|| row_cell(row, origin)) {
                return Some(v);
            }
        }
    }
    None
}

/// Volumetric weight for the shipment.
///
/// Itemized lines round up individually before summing; the legacy
/// single-box form rounds up once.
pub fn volumetric_weight(rate: &PriceRate, ctx: &RouteContext) -> f64 {
    let k = rate.k();

    if let Some(items) = &ctx.shipment_details {
        if !items.is_empty() {
            return items
                .iter()
                .map(|it| (it.length * it.width * it.height * it.count as f64 / k).ceil())
                .sum();
        }
    }

    if let (Some(l), Some(w), Some(h), Some(n)) = (ctx.length, ctx.width, ctx.height, ctx.noofboxes)
    {
        return (l * w * h * n as f64 / k).ceil();
    }

    0.0
}

fn money(v: f64) -> i64 {
    v.round() as i64
}

/// Computes one vendor's itemized quote for a route.
///
/// Pure: the result depends only on the vendor record and the context.
/// `Ok(None)` drops the vendor (no chart, unpriceable route, no zones);
/// `Err` marks a malformed vendor record.
pub fn calculate(vendor: &Vendor, ctx: &RouteContext) -> Result<Option<Quote>> {
    // Pricing source depends on the commercial relationship.
    let (chart, rate, invoice_charges) = match vendor.vendor_type {
        VendorType::TiedUp => {
            let prices = vendor
                .prices
                .as_ref()
                .ok_or_else(|| anyhow!("tied-up vendor {} has no pricing tables", vendor.company_name))?;
            (
                &prices.price_chart,
                &prices.price_rate,
                vendor.invoice_value_charges,
            )
        }
        VendorType::Public => {
            let data = vendor
                .price_data
                .as_ref()
                .ok_or_else(|| anyhow!("public vendor {} has no price data", vendor.company_name))?;
            (&data.zone_rates, &data.price_rate, data.invoice_value_charges)
        }
    };
    if chart.is_empty() {
        return Ok(None);
    }

    // Vendor-resolved zones win over the request's zones.
    let from_zone = norm_zone(
        vendor
            .effective_origin_zone
            .as_deref()
            .filter(|z| !z.trim().is_empty())
            .unwrap_or(&ctx.from_zone),
    );
    let to_zone = norm_zone(
        vendor
            .effective_dest_zone
            .as_deref()
            .filter(|z| !z.trim().is_empty())
            .unwrap_or(&ctx.to_zone),
    );
    if from_zone.is_empty() || to_zone.is_empty() {
        return Ok(None);
    }

    let Some(unit) = unit_price(chart, &from_zone, &to_zone) else {
        return Ok(None);
    };

    let volumetric = volumetric_weight(rate, ctx);
    let actual = ctx.actual_weight.max(0.0);
    let chargeable = volumetric.max(actual);

    let base_freight = unit * chargeable;
    let fuel = rate.fuel / 100.0 * base_freight;

    // The four floored components: max(variable% of base, fixed).
    let mut floored = HashMap::new();
    for kind in ChargeKind::iter() {
        let c = rate.component(kind);
        floored.insert(kind, (c.variable / 100.0 * base_freight).max(c.fixed));
    }

    let oda = if vendor.dest_is_oda {
        rate.oda_charges.fixed + chargeable * rate.oda_charges.variable / 100.0
    } else {
        0.0
    };
    let handling = rate.handling_charges.fixed + chargeable * rate.handling_charges.variable / 100.0;

    // The minimum acts as a floor on the base only, never on the total.
    let effective_base = base_freight.max(rate.min_charges);

    let subtotal = effective_base
        + rate.docket_charges
        + rate.green_tax
        + rate.dacc_charges
        + rate.miscellanous_charges
        + fuel
        + floored[&ChargeKind::Rov]
        + floored[&ChargeKind::Insurance]
        + oda
        + handling
        + floored[&ChargeKind::FirstMile]
        + floored[&ChargeKind::Appointment];

    let invoice_addon = match invoice_charges {
        Some(c) if c.enabled && ctx.invoice_value > 0.0 => {
            (ctx.invoice_value * c.percentage / 100.0)
                .max(c.minimum_amount)
                .round()
        }
        _ => 0.0,
    };
    let total = money(subtotal + invoice_addon);

    let is_tied_up = vendor.vendor_type == VendorType::TiedUp
        && vendor.customer_id.is_some()
        && vendor.customer_id == ctx.customer_id;

    Ok(Some(Quote {
        vendor_id: vendor.id.clone(),
        company_name: vendor.company_name.clone(),
        vendor_type: vendor.vendor_type,
        from_zone,
        to_zone,
        unit_price: unit,
        actual_weight: round2(actual),
        volumetric_weight: round2(volumetric),
        chargeable_weight: round2(chargeable),
        base_freight: money(base_freight),
        effective_base_freight: money(effective_base),
        docket_charges: money(rate.docket_charges),
        fuel_charges: money(fuel),
        rov_charges: money(floored[&ChargeKind::Rov]),
        insuarance_charges: money(floored[&ChargeKind::Insurance]),
        oda_charges: money(oda),
        handling_charges: money(handling),
        fm_charges: money(floored[&ChargeKind::FirstMile]),
        appointment_charges: money(floored[&ChargeKind::Appointment]),
        green_tax: money(rate.green_tax),
        dacc_charges: money(rate.dacc_charges),
        miscellanous_charges: money(rate.miscellanous_charges),
        invoice_addon: invoice_addon as i64,
        total,
        dest_is_oda: vendor.dest_is_oda,
        is_tied_up,
        is_hidden: vendor.is_hidden,
        is_verified: vendor.is_verified,
        rating: vendor.rating,
        phone: vendor.phone.clone(),
        email: vendor.email.clone(),
        est_time: ctx.est_time.clone(),
        distance_km: ctx.distance_km,
        tier: None,
    }))
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use serde_json::json;

    fn chart(cells: &[(&str, &str, f64)]) -> PriceChart {
        let mut chart = PriceChart::new();
        for (o, d, v) in cells {
            chart
                .entry(o.to_string())
                .or_default()
                .insert(d.to_string(), json!(v));
        }
        chart
    }

    /// A tied-up vendor with the given chart and rate.
    pub fn vendor(name: &str, chart: PriceChart, rate: PriceRate) -> Vendor {
        Vendor {
            id: name.to_lowercase(),
            company_name: name.into(),
            vendor_type: VendorType::TiedUp,
            prices: Some(VendorPrices {
                price_chart: chart,
                price_rate: rate,
            }),
            ..Default::default()
        }
    }

    pub fn ctx(from_zone: &str, to_zone: &str, weight: f64) -> RouteContext {
        RouteContext {
            from_pincode: 110001,
            to_pincode: 560001,
            from_zone: from_zone.into(),
            to_zone: to_zone.into(),
            actual_weight: weight,
            ..Default::default()
        }
    }

    #[test]
    fn test_unit_price_orientations() {
        let chart = chart(&[("N1", "S2", 18.0)]);
        assert_eq!(unit_price(&chart, "N1", "S2"), Some(18.0));
        assert_eq!(unit_price(&chart, "S2", "N1"), Some(18.0));
        assert_eq!(unit_price(&chart, " n1 ", "s2"), Some(18.0));
        assert_eq!(unit_price(&chart, "N1", "W3"), None);
    }

    #[test]
    fn test_unit_price_case_insensitive_reverse() {
        // Lowercase top-level key, reverse orientation.
        let chart = chart(&[("n1", "S2", 18.0)]);
        assert_eq!(unit_price(&chart, "S2", "N1"), Some(18.0));
    }

    #[test]
    fn test_unit_price_coerces_strings() {
        let mut chart = PriceChart::new();
        chart
            .entry("N1".into())
            .or_default()
            .insert("S2".into(), json!("12.5"));
        chart
            .entry("N1".into())
            .or_default()
            .insert("W3".into(), json!(null));
        assert_eq!(unit_price(&chart, "N1", "S2"), Some(12.5));
        assert_eq!(unit_price(&chart, "N1", "W3"), None);
    }

    #[test]
    fn test_volumetric_itemized_rounds_per_line() {
        let rate = PriceRate::default();
        let mut c = ctx("N1", "S2", 0.0);
        c.shipment_details = Some(vec![
            ShipmentItem {
                length: 100.0,
                width: 50.0,
                height: 30.0,
                count: 2,
            },
            ShipmentItem {
                length: 10.0,
                width: 10.0,
                height: 10.0,
                count: 1,
            },
        ]);
        // 300000/5000 = 60 exactly, 1000/5000 rounds up to 1.
        assert_eq!(volumetric_weight(&rate, &c), 61.0);
    }

    #[test]
    fn test_volumetric_legacy_single_ceiling() {
        let rate = PriceRate::default();
        let mut c = ctx("N1", "S2", 0.0);
        c.length = Some(100.0);
        c.width = Some(50.0);
        c.height = Some(30.1);
        c.noofboxes = Some(2);
        // 301000/5000 = 60.2, one ceiling over the whole shipment.
        assert_eq!(volumetric_weight(&rate, &c), 61.0);
    }

    #[test]
    fn test_volumetric_absent_dimensions() {
        let rate = PriceRate::default();
        let mut c = ctx("N1", "S2", 12.0);
        assert_eq!(volumetric_weight(&rate, &c), 0.0);

        // Partial legacy dimensions do not count.
        c.length = Some(100.0);
        c.width = Some(50.0);
        assert_eq!(volumetric_weight(&rate, &c), 0.0);
    }

    #[test]
    fn test_quote_math() {
        let mut rate = PriceRate::default();
        rate.fuel = 10.0;
        rate.min_charges = 400.0;
        rate.rov_charges = ChargeComponent {
            fixed: 50.0,
            variable: 2.0,
        };
        let v = vendor("Acme Logistics", chart(&[("N1", "S2", 12.0)]), rate);
        let c = ctx("N1", "S2", 25.0);

        let q = calculate(&v, &c).unwrap().unwrap();
        assert_eq!(q.chargeable_weight, 25.0);
        assert_eq!(q.base_freight, 300);
        assert_eq!(q.effective_base_freight, 400);
        assert_eq!(q.fuel_charges, 30);
        assert_eq!(q.rov_charges, 50);
        assert_eq!(q.invoice_addon, 0);
        assert_eq!(q.total, 480);
    }

    #[test]
    fn test_zero_weight_floors_to_min_charges() {
        let mut rate = PriceRate::default();
        rate.min_charges = 250.0;
        let v = vendor("Acme Logistics", chart(&[("N1", "S2", 12.0)]), rate);
        let c = ctx("N1", "S2", 0.0);

        let q = calculate(&v, &c).unwrap().unwrap();
        assert_eq!(q.chargeable_weight, 0.0);
        assert_eq!(q.base_freight, 0);
        assert_eq!(q.effective_base_freight, 250);
        assert_eq!(q.total, 250);
    }

    #[test]
    fn test_oda_and_handling() {
        let mut rate = PriceRate::default();
        rate.oda_charges = ChargeComponent {
            fixed: 100.0,
            variable: 4.0,
        };
        rate.handling_charges = ChargeComponent {
            fixed: 30.0,
            variable: 2.0,
        };
        let mut v = vendor("Acme Logistics", chart(&[("N1", "S2", 10.0)]), rate);
        let c = ctx("N1", "S2", 50.0);

        // Handling is additive even off the delivery-area surcharge path.
        let q = calculate(&v, &c).unwrap().unwrap();
        assert_eq!(q.oda_charges, 0);
        assert_eq!(q.handling_charges, 31); // 30 + 50*2%

        v.dest_is_oda = true;
        let q = calculate(&v, &c).unwrap().unwrap();
        assert_eq!(q.oda_charges, 102); // 100 + 50*4%
        assert!(q.dest_is_oda);
    }

    #[test]
    fn test_invoice_addon() {
        let mut v = vendor(
            "Acme Logistics",
            chart(&[("N1", "S2", 10.0)]),
            PriceRate::default(),
        );
        v.invoice_value_charges = Some(InvoiceValueCharges {
            enabled: true,
            percentage: 2.0,
            minimum_amount: 100.0,
        });
        let mut c = ctx("N1", "S2", 10.0);

        // Base 100; 2% of 30000 beats the minimum.
        c.invoice_value = 30_000.0;
        let q = calculate(&v, &c).unwrap().unwrap();
        assert_eq!(q.invoice_addon, 600);
        assert_eq!(q.total, 700);

        // The minimum floors small declarations.
        c.invoice_value = 1_000.0;
        let q = calculate(&v, &c).unwrap().unwrap();
        assert_eq!(q.invoice_addon, 100);

        // Zero or negative declared value disables the addon entirely.
        c.invoice_value = 0.0;
        let q = calculate(&v, &c).unwrap().unwrap();
        assert_eq!(q.invoice_addon, 0);
    }

    #[test]
    fn test_drops_and_errors() {
        // Empty chart drops the vendor.
        let v = vendor("Acme Logistics", PriceChart::new(), PriceRate::default());
        assert!(calculate(&v, &ctx("N1", "S2", 10.0)).unwrap().is_none());

        // Unpriceable route drops the vendor.
        let v = vendor(
            "Acme Logistics",
            chart(&[("N1", "S2", 10.0)]),
            PriceRate::default(),
        );
        assert!(calculate(&v, &ctx("N1", "W3", 10.0)).unwrap().is_none());

        // No zones at all drops the vendor.
        assert!(calculate(&v, &ctx("", "", 10.0)).unwrap().is_none());

        // A tied-up vendor without tables is malformed, not a silent drop.
        let mut broken = v.clone();
        broken.prices = None;
        assert!(calculate(&broken, &ctx("N1", "S2", 10.0)).is_err());
    }

    #[test]
    fn test_vendor_zones_win_over_request() {
        let mut v = vendor(
            "Acme Logistics",
            chart(&[("W3", "S2", 7.0)]),
            PriceRate::default(),
        );
        v.effective_origin_zone = Some("W3".into());
        let c = ctx("N1", "S2", 10.0);

        let q = calculate(&v, &c).unwrap().unwrap();
        assert_eq!(q.from_zone, "W3");
        assert_eq!(q.unit_price, 7.0);
    }

    #[test]
    fn test_tied_up_annotation() {
        let mut v = vendor(
            "Acme Logistics",
            chart(&[("N1", "S2", 10.0)]),
            PriceRate::default(),
        );
        v.customer_id = Some("c9".into());
        let mut c = ctx("N1", "S2", 10.0);

        let q = calculate(&v, &c).unwrap().unwrap();
        assert!(!q.is_tied_up);

        c.customer_id = Some("c9".into());
        let q = calculate(&v, &c).unwrap().unwrap();
        assert!(q.is_tied_up);
    }

    #[test]
    fn test_purity() {
        let mut rate = PriceRate::default();
        rate.fuel = 12.5;
        rate.docket_charges = 90.0;
        let v = vendor("Acme Logistics", chart(&[("N1", "S2", 12.0)]), rate);
        let c = ctx("N1", "S2", 37.0);

        let a = calculate(&v, &c).unwrap().unwrap();
        let b = calculate(&v, &c).unwrap().unwrap();
        assert_eq!(serde_json::to_value(&a).unwrap(), serde_json::to_value(&b).unwrap());
    }
}
