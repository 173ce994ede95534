use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::GatewayError;

/// Every PIX gateway the platform can route through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    Syncpay,
    Pushynpay,
    Paradise,
    Wiinpay,
    Atomopay,
    Umbrellapag,
    Orionpay,
    Bolt,
    Babylon,
    Hoopay,
}

impl GatewayKind {
    pub const ALL: [GatewayKind; 10] = [
        GatewayKind::Syncpay,
        GatewayKind::Pushynpay,
        GatewayKind::Paradise,
        GatewayKind::Wiinpay,
        GatewayKind::Atomopay,
        GatewayKind::Umbrellapag,
        GatewayKind::Orionpay,
        GatewayKind::Bolt,
        GatewayKind::Babylon,
        GatewayKind::Hoopay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayKind::Syncpay => "syncpay",
            GatewayKind::Pushynpay => "pushynpay",
            GatewayKind::Paradise => "paradise",
            GatewayKind::Wiinpay => "wiinpay",
            GatewayKind::Atomopay => "atomopay",
            GatewayKind::Umbrellapag => "umbrellapag",
            GatewayKind::Orionpay => "orionpay",
            GatewayKind::Bolt => "bolt",
            GatewayKind::Babylon => "babylon",
            GatewayKind::Hoopay => "hoopay",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            GatewayKind::Syncpay => "SyncPay",
            GatewayKind::Pushynpay => "PushynPay",
            GatewayKind::Paradise => "Paradise",
            GatewayKind::Wiinpay => "WiinPay",
            GatewayKind::Atomopay => "Átomo Pay",
            GatewayKind::Umbrellapag => "UmbrellaPag",
            GatewayKind::Orionpay => "OrionPay",
            GatewayKind::Bolt => "Bolt",
            GatewayKind::Babylon => "Babylon",
            GatewayKind::Hoopay => "Hoopay",
        }
    }
}

impl fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GatewayKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "syncpay" => Ok(GatewayKind::Syncpay),
            "pushynpay" | "pushinpay" => Ok(GatewayKind::Pushynpay),
            "paradise" => Ok(GatewayKind::Paradise),
            "wiinpay" => Ok(GatewayKind::Wiinpay),
            "atomopay" | "atomo" => Ok(GatewayKind::Atomopay),
            "umbrellapag" | "umbrella" => Ok(GatewayKind::Umbrellapag),
            "orionpay" | "orion" => Ok(GatewayKind::Orionpay),
            "bolt" => Ok(GatewayKind::Bolt),
            "babylon" => Ok(GatewayKind::Babylon),
            "hoopay" => Ok(GatewayKind::Hoopay),
            other => Err(GatewayError::InvalidInput {
                message: format!("unknown gateway '{}'", other),
                field: Some("gateway_type".to_string()),
            }),
        }
    }
}

/// Canonical payment state after status-vocabulary normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixStatus {
    Paid,
    Pending,
    Failed,
}

impl PixStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PixStatus::Paid => "paid",
            PixStatus::Pending => "pending",
            PixStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PixStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps the union of all gateway status vocabularies onto the canonical
/// three-state model. Unknown strings map to `Pending` so a novel gateway
/// status never promotes or kills a payment by accident; callers should log
/// the raw value when `map_raw_status` falls through.
pub fn map_raw_status(raw: &str) -> PixStatus {
    let normalized = raw.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "paid" | "approved" | "completed" | "confirmed" | "success" | "paid_out"
        | "access.granted" | "payment.success" | "purchase.approved" => PixStatus::Paid,
        "pending" | "waiting" | "waiting_payment" | "processing" | "created"
        | "purchase.created" | "in_process" | "analysis" => PixStatus::Pending,
        "refused" | "cancelled" | "canceled" | "expired" | "refunded" | "chargedback"
        | "chargeback" | "failed" | "rejected" | "purchase.refused" => PixStatus::Failed,
        _ => PixStatus::Pending,
    }
}

/// True when `map_raw_status` had a real vocabulary entry for the string,
/// false when it fell back to `Pending`.
pub fn raw_status_is_known(raw: &str) -> bool {
    let normalized = raw.trim().to_ascii_lowercase();
    if map_raw_status(&normalized) != PixStatus::Pending {
        return true;
    }
    matches!(
        normalized.as_str(),
        "pending"
            | "waiting"
            | "waiting_payment"
            | "processing"
            | "created"
            | "purchase.created"
            | "in_process"
            | "analysis"
    )
}

/// Buyer details forwarded to gateways that require a customer object.
/// Everything here is optional; drivers synthesize what their API demands.
#[derive(Debug, Clone, Default)]
pub struct PixCustomer {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub document: Option<String>,
}

/// A charge request expressed in reais. Unit conversion to centavos happens
/// inside the drivers that need it, never in calling code.
#[derive(Debug, Clone)]
pub struct PixChargeRequest {
    pub amount: Decimal,
    pub description: String,
    pub payment_id: String,
    pub customer: PixCustomer,
    pub webhook_url: String,
}

/// A freshly created charge as returned by a driver.
#[derive(Debug, Clone, Serialize)]
pub struct PixCharge {
    /// The copy-paste PIX EMV string shown to the buyer.
    pub pix_code: String,
    pub qr_code_url: Option<String>,
    /// Gateway-side primary identifier.
    pub transaction_id: String,
    /// Secondary identifier some gateways issue (hash, external code).
    pub transaction_hash: Option<String>,
    /// Our reference as echoed back by the gateway, when it echoes one.
    pub reference: Option<String>,
}

/// Parsed, gateway-agnostic view of an inbound webhook.
#[derive(Debug, Clone)]
pub struct WebhookOutcome {
    pub transaction_id: Option<String>,
    pub transaction_hash: Option<String>,
    pub status: PixStatus,
    pub raw_status: String,
    /// Amount in reais when the payload carried one.
    pub amount: Option<Decimal>,
    pub external_reference: Option<String>,
    pub end_to_end_id: Option<String>,
    pub payer_name: Option<String>,
}

/// Result of an active status poll against a gateway.
#[derive(Debug, Clone)]
pub struct StatusLookup {
    pub status: PixStatus,
    pub raw_status: String,
    pub paid_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_map_covers_paid_vocabulary() {
        for raw in [
            "paid",
            "APPROVED",
            "completed",
            "confirmed",
            "success",
            "PAID_OUT",
            "access.granted",
            "payment.success",
        ] {
            assert_eq!(map_raw_status(raw), PixStatus::Paid, "raw={raw}");
        }
    }

    #[test]
    fn canonical_map_covers_failed_vocabulary() {
        for raw in [
            "refused",
            "cancelled",
            "canceled",
            "EXPIRED",
            "refunded",
            "chargedback",
            "failed",
            "rejected",
        ] {
            assert_eq!(map_raw_status(raw), PixStatus::Failed, "raw={raw}");
        }
    }

    #[test]
    fn unknown_statuses_fall_back_to_pending() {
        assert_eq!(map_raw_status("quantum_flux"), PixStatus::Pending);
        assert!(!raw_status_is_known("quantum_flux"));
        assert!(raw_status_is_known("waiting_payment"));
        assert!(raw_status_is_known("paid"));
    }

    #[test]
    fn gateway_kind_round_trips_through_tag() {
        for kind in GatewayKind::ALL {
            assert_eq!(kind.as_str().parse::<GatewayKind>().ok(), Some(kind));
        }
        assert!("stripe".parse::<GatewayKind>().is_err());
    }
}
