use chrono::{DateTime, Utc};
use pem::Pem;
use serde::{Deserialize, Serialize};

use crate::domain::{AccountId, CertificateId, OrderId};

/// A certificate issued by finalizing an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcmeCertificate {
    pub id: CertificateId,
    pub account_id: AccountId,
    pub order_id: OrderId,
    pub serial: String,
    pub leaf_der: Vec<u8>,
    pub chain_der: Vec<Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

impl AcmeCertificate {
    /// Leaf then intermediates, as served for `application/pem-certificate-chain`.
    pub fn pem_chain(&self) -> String {
        std::iter::once(&self.leaf_der)
            .chain(self.chain_der.iter())
            .map(|der| pem::encode(&Pem::new("CERTIFICATE", der.as_slice())))
            .collect()
    }
}
