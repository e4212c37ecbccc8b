use thiserror::Error;

use crate::models::OfferStatus;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Offer already settled as {0}")]
    OfferAlreadySettled(OfferStatus),

    #[error("Invalid offer transition: {from} -> {to}")]
    InvalidTransition { from: OfferStatus, to: OfferStatus },

    #[error("Malformed document {id}: {reason}")]
    MalformedDocument { id: String, reason: String },
}
