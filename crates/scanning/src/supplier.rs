//! Supplier context for the legacy manual material-scan flow.
//!
//! Unrelated to [`crate::session`]: a supplier context lives until it is
//! explicitly cleared and scopes "material" scans that happen outside any
//! stocktake session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stocktake_core::{DeviceId, DomainError, DomainResult, SupplierId};

use crate::submission::Barcode;

/// Persisted as `{id, name, timestamp}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierContext {
    pub id: SupplierId,
    pub name: String,
    pub timestamp: DateTime<Utc>,
}

impl SupplierContext {
    pub fn new(id: SupplierId, name: &str, timestamp: DateTime<Utc>) -> DomainResult<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("supplier name cannot be empty"));
        }
        Ok(Self {
            id,
            name: name.to_string(),
            timestamp,
        })
    }

    /// Attribute a material barcode to this supplier.
    pub fn scope_material(
        &self,
        barcode: Barcode,
        device_id: DeviceId,
        scanned_at: DateTime<Utc>,
    ) -> MaterialScan {
        MaterialScan {
            barcode,
            supplier_id: self.id.clone(),
            supplier_name: self.name.clone(),
            device_id,
            scanned_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialScan {
    pub barcode: Barcode,
    pub supplier_id: SupplierId,
    pub supplier_name: String,
    pub device_id: DeviceId,
    pub scanned_at: DateTime<Utc>,
}
