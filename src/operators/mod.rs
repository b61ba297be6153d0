//! Domain-specific spatial operators and payoff functions.

pub mod black_scholes;
pub mod payoff;
pub mod penalty;

pub use black_scholes::BlackScholes;
pub use payoff::{call_payoff, digital_call_payoff, digital_put_payoff, put_payoff};
pub use penalty::PenaltyMethod;
