//! Shared amount-matching and fee computation utilities.

use crate::models::EscrowFees;

/// Maximum allowed absolute difference between expected and received crypto
/// amounts for an "exact" match (8-decimal crypto precision). Exact float
/// equality is never used.
pub const AMOUNT_TOLERANCE: f64 = 1e-8;

/// Escrow fee: 2% of the fiat amount.
pub const ESCROW_FEE_RATE: f64 = 0.02;
/// Arbitration fee: 1% of the fiat amount.
pub const ARBITRATION_FEE_RATE: f64 = 0.01;
/// Flat network fee, fiat-denominated.
pub const NETWORK_FEE_FLAT: f64 = 5.0;

/// Compare a chain-observed amount against the required amount.
pub fn amounts_match(received: f64, expected: f64, tolerance: f64) -> bool {
    (received - expected).abs() <= tolerance
}

/// Round a fiat amount to cents.
pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Compute the fee breakdown for an escrow contract.
pub fn compute_fees(fiat_amount: f64) -> EscrowFees {
    EscrowFees {
        escrow_fee: round_cents(fiat_amount * ESCROW_FEE_RATE),
        arbitration_fee: round_cents(fiat_amount * ARBITRATION_FEE_RATE),
        network_fee: NETWORK_FEE_FLAT,
    }
}
