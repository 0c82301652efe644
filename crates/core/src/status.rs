//! Status vocabulary: closed classification over backend codes/labels,
//! plus the French labels and message templates the UI shows.
//!
//! All business logic branches on [`StatusClass`]; raw strings only appear
//! at the edges (feed shaping here, display in messages).

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// Closed classification of an order status label.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    Pending,
    Preparing,
    Delivering,
    Delivered,
    Cancelled,
    Unknown,
}

// Case-insensitive substring synonyms, checked in order. "livr" covers both
// "livrée" and "en livraison", so delivering must win first for those.
const DELIVERING_SYNONYMS: &[&str] = &["en livraison", "delivering", "out_for_delivery", "en cours"];
const DELIVERED_SYNONYMS: &[&str] = &["delivered", "livr"];
const PENDING_SYNONYMS: &[&str] = &["pending", "attente"];
const PREPARING_SYNONYMS: &[&str] = &["preparing", "prépar", "prepar"];
const CANCELLED_SYNONYMS: &[&str] = &["cancel", "annul"];

fn matches_any(label: &str, synonyms: &[&str]) -> bool {
    synonyms.iter().any(|s| label.contains(s))
}

/// Map a human status label (or raw code) onto the closed class set.
pub fn classify(label: &str) -> StatusClass {
    let l = label.to_lowercase();
    if matches_any(&l, DELIVERING_SYNONYMS) {
        StatusClass::Delivering
    } else if matches_any(&l, DELIVERED_SYNONYMS) {
        StatusClass::Delivered
    } else if matches_any(&l, PENDING_SYNONYMS) {
        StatusClass::Pending
    } else if matches_any(&l, PREPARING_SYNONYMS) {
        StatusClass::Preparing
    } else if matches_any(&l, CANCELLED_SYNONYMS) {
        StatusClass::Cancelled
    } else {
        StatusClass::Unknown
    }
}

/// Human label for a record: the backend's explicit label when present,
/// else a fixed mapping over known raw codes. Unrecognized codes pass
/// through unchanged.
pub fn status_text(label: Option<&str>, raw: &str) -> String {
    if let Some(l) = label {
        if !l.is_empty() {
            return l.to_string();
        }
    }
    match raw.to_lowercase().as_str() {
        "pending" => "En attente".to_string(),
        "preparing" | "in_preparation" => "En préparation".to_string(),
        "delivering" | "out_for_delivery" | "shipping" => "En livraison".to_string(),
        "delivered" | "completed" => "Livrée".to_string(),
        "cancelled" | "canceled" => "Annulée".to_string(),
        _ => raw.to_string(),
    }
}

pub fn new_order_message(reference: &str, customer: Option<&str>) -> String {
    match customer {
        Some(c) => format!("Nouvelle commande {} de {}", reference, c),
        None => format!("Nouvelle commande {}", reference),
    }
}

pub fn delivered_message(reference: &str) -> String {
    format!("La commande {} a été livrée avec succès", reference)
}

pub fn change_message(reference: &str, status: Option<&str>) -> String {
    match status {
        Some(s) => format!("La commande {} est passée à \"{}\"", reference, s),
        None => format!("La commande {} a changé de statut", reference),
    }
}
