//! Option payoff functions, used both as initial conditions and as
//! obstacles for early exercise.

use crate::core::Real;

/// Vanilla call payoff `max(S − K, 0)`.
pub fn call_payoff(strike: Real) -> impl Fn([Real; 1]) -> Real {
    move |x| (x[0] - strike).max(0.0)
}

/// Vanilla put payoff `max(K − S, 0)`.
pub fn put_payoff(strike: Real) -> impl Fn([Real; 1]) -> Real {
    move |x| (strike - x[0]).max(0.0)
}

/// Cash-or-nothing call paying 1 above the strike.
pub fn digital_call_payoff(strike: Real) -> impl Fn([Real; 1]) -> Real {
    move |x| if x[0] > strike { 1.0 } else { 0.0 }
}

/// Cash-or-nothing put paying 1 below the strike.
pub fn digital_put_payoff(strike: Real) -> impl Fn([Real; 1]) -> Real {
    move |x| if x[0] < strike { 1.0 } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vanilla_payoffs_kink_at_the_strike() {
        let call = call_payoff(100.0);
        let put = put_payoff(100.0);
        assert_eq!(call([120.0]), 20.0);
        assert_eq!(call([80.0]), 0.0);
        assert_eq!(put([80.0]), 20.0);
        assert_eq!(put([120.0]), 0.0);
        assert_eq!(call([100.0]), 0.0);
    }

    #[test]
    fn digital_payoffs_jump_at_the_strike() {
        let call = digital_call_payoff(100.0);
        let put = digital_put_payoff(100.0);
        assert_eq!(call([100.5]), 1.0);
        assert_eq!(call([99.5]), 0.0);
        assert_eq!(put([99.5]), 1.0);
        assert_eq!(put([100.5]), 0.0);
    }
}
