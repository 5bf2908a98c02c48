use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use strum::EnumIter;

/// Commercial relationship between the platform and a vendor.
#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VendorType {
    #[serde(rename = "tied-up")]
    TiedUp,
    #[default]
    #[serde(rename = "public")]
    Public,
}
impl fmt::Display for VendorType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            VendorType::TiedUp => write!(f, "tied-up"),
            VendorType::Public => write!(f, "public"),
        }
    }
}

/// A rate component with a fixed floor and a variable part.
#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ChargeComponent {
    pub fixed: f64,
    pub variable: f64,
}

/// The charge kinds priced as `max(variable% of base freight, fixed)`.
#[derive(Debug, EnumIter, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChargeKind {
    Rov,
    Insurance,
    FirstMile,
    Appointment,
}

/// Flat bag of numeric rate parameters for one vendor.
///
/// Field spellings match the vendor wire format, including its historical
/// misspellings (`insuaranceCharges`, `miscellanousCharges`).
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct PriceRate {
    /// Volumetric divisor. `divisor` is the legacy alias; 0 and absent both
    /// fall back to 5000.
    pub k_factor: Option<f64>,
    pub divisor: Option<f64>,
    pub docket_charges: f64,
    pub min_charges: f64,
    pub green_tax: f64,
    pub dacc_charges: f64,
    pub miscellanous_charges: f64,
    /// Fuel surcharge percent applied to base freight.
    pub fuel: f64,
    pub rov_charges: ChargeComponent,
    pub insuarance_charges: ChargeComponent,
    pub oda_charges: ChargeComponent,
    pub handling_charges: ChargeComponent,
    pub fm_charges: ChargeComponent,
    pub appointment_charges: ChargeComponent,
}

impl PriceRate {
    /// Effective volumetric divisor.
    pub fn k(&self) -> f64 {
        let k = self.k_factor.or(self.divisor).unwrap_or(5000.0);
        if k <= 0.0 {
            5000.0
        } else {
            k
        }
    }

    pub fn component(&self, kind: ChargeKind) -> &ChargeComponent {
        match kind {
            ChargeKind::Rov => &self.rov_charges,
            ChargeKind::Insurance => &self.insuarance_charges,
            ChargeKind::FirstMile => &self.fm_charges,
            ChargeKind::Appointment => &self.appointment_charges,
        }
    }
}

/// Surcharge applied as a percentage of the declared invoice value.
#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy)]
#[serde(rename_all = "camelCase", default)]
pub struct InvoiceValueCharges {
    pub enabled: bool,
    pub percentage: f64,
    pub minimum_amount: f64,
}

/// Two-level zone-pair rate table. Cells tolerate numeric or string values.
pub type PriceChart = HashMap<String, HashMap<String, Value>>;

/// Pricing tables for a tied-up vendor.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct VendorPrices {
    pub price_chart: PriceChart,
    pub price_rate: PriceRate,
}

/// Pricing tables for a public vendor.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct PublicPriceData {
    pub zone_rates: PriceChart,
    pub price_rate: PriceRate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_value_charges: Option<InvoiceValueCharges>,
}

/// A vendor as seen by the calculator: read-only per request.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct Vendor {
    #[serde(rename = "_id")]
    pub id: String,
    pub company_name: String,
    #[serde(rename = "type")]
    pub vendor_type: VendorType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prices: Option<VendorPrices>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_data: Option<PublicPriceData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_value_charges: Option<InvoiceValueCharges>,
    pub effective_origin_zone: Option<String>,
    pub effective_dest_zone: Option<String>,
    pub dest_is_oda: bool,
    pub is_hidden: bool,
    pub approval_status: Option<String>,
    pub is_verified: bool,
    pub rating: f64,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub selected_zones: Option<Vec<String>>,
    pub zone_config: Option<Value>,
    #[serde(rename = "customerID")]
    pub customer_id: Option<String>,
    pub service_pincode_count: Option<u64>,
}
impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{},{},{}",
            self.id, self.company_name, self.vendor_type
        )
    }
}

/// One line of an itemized shipment.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
#[serde(rename_all = "camelCase", default)]
pub struct ShipmentItem {
    pub length: f64,
    pub width: f64,
    pub height: f64,
    pub count: u32,
}
impl Default for ShipmentItem {
    fn default() -> Self {
        Self {
            length: 0.0,
            width: 0.0,
            height: 0.0,
            count: 1,
        }
    }
}

/// A quote request as submitted by the caller.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct QuoteRequest {
    pub from_pincode: String,
    pub to_pincode: String,
    pub actual_weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipment_details: Option<Vec<ShipmentItem>>,
    // Legacy single-box dimensions.
    pub length: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub noofboxes: Option<u32>,
    pub invoice_value: f64,
    #[serde(rename = "customerID")]
    pub customer_id: Option<String>,
    pub distance_km: Option<f64>,
    pub est_time: Option<String>,
}

/// Resolved route context handed to calculator workers.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct RouteContext {
    pub from_pincode: u32,
    pub to_pincode: u32,
    pub from_zone: String,
    pub to_zone: String,
    pub distance_km: Option<f64>,
    pub est_time: Option<String>,
    pub actual_weight: f64,
    pub shipment_details: Option<Vec<ShipmentItem>>,
    pub length: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub noofboxes: Option<u32>,
    pub invoice_value: f64,
    #[serde(rename = "customerID")]
    pub customer_id: Option<String>,
}

/// Ranked-list annotation on an emitted quote.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum QuoteTier {
    #[serde(rename = "CHEAPEST")]
    Cheapest,
    #[serde(rename = "TOP_RATED")]
    TopRated,
    #[serde(rename = "STANDARD")]
    Standard,
}

/// One vendor's itemized quote.
///
/// Monetary fields are rounded integers; weight fields carry two decimals.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub vendor_id: String,
    pub company_name: String,
    #[serde(rename = "type")]
    pub vendor_type: VendorType,
    pub from_zone: String,
    pub to_zone: String,
    pub unit_price: f64,
    pub actual_weight: f64,
    pub volumetric_weight: f64,
    pub chargeable_weight: f64,
    pub base_freight: i64,
    pub effective_base_freight: i64,
    pub docket_charges: i64,
    pub fuel_charges: i64,
    pub rov_charges: i64,
    pub insuarance_charges: i64,
    pub oda_charges: i64,
    pub handling_charges: i64,
    pub fm_charges: i64,
    pub appointment_charges: i64,
    pub green_tax: i64,
    pub dacc_charges: i64,
    pub miscellanous_charges: i64,
    pub invoice_addon: i64,
    pub total: i64,
    pub dest_is_oda: bool,
    pub is_tied_up: bool,
    pub is_hidden: bool,
    pub is_verified: bool,
    pub rating: f64,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub est_time: Option<String>,
    pub distance_km: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<QuoteTier>,
}
impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{},{},{}", self.company_name, self.chargeable_weight, self.total)
    }
}
