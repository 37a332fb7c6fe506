//! Integer-cent money helpers. Rates are basis points (1% = 100bp).

use crate::config::FeeConfig;
use crate::error::{AppError, AppResult};

const BP_DENOMINATOR: i64 = 10_000;

fn overflow(amount_cents: i64) -> AppError {
    AppError::ValidationError(format!("Amount {amount_cents} is out of range"))
}

/// `amount * bp / 10000`, rounded half to even
pub fn mul_bp_half_even(amount_cents: i64, bp: i64) -> AppResult<i64> {
    let n = amount_cents
        .checked_mul(bp)
        .ok_or_else(|| overflow(amount_cents))?;
    let q = n.div_euclid(BP_DENOMINATOR);
    let r = n.rem_euclid(BP_DENOMINATOR);
    Ok(match (2 * r).cmp(&BP_DENOMINATOR) {
        std::cmp::Ordering::Less => q,
        std::cmp::Ordering::Greater => q + 1,
        std::cmp::Ordering::Equal => q + (q & 1),
    })
}

/// One roll per whole currency unit
pub fn roll_count(amount_cents: i64) -> i64 {
    amount_cents.max(0) / 100
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeBreakdown {
    pub gross_cents: i64,
    pub fee_cents: i64,
    pub net_cents: i64,
    pub recipient_cents: i64,
    pub platform_cents: i64,
    pub artist_cents: i64,
}

impl FeeBreakdown {
    /// Processor fee then net split. Without an artist the platform absorbs the artist share.
    pub fn compute(gross_cents: i64, has_artist: bool, fees: &FeeConfig) -> AppResult<Self> {
        let fee_cents = mul_bp_half_even(gross_cents, fees.processor_rate_bp)?
            .checked_add(fees.processor_fixed_cents)
            .ok_or_else(|| overflow(gross_cents))?
            .min(gross_cents);
        let net_cents = gross_cents - fee_cents;
        let recipient_cents = mul_bp_half_even(net_cents, fees.recipient_bp)?;
        let artist_cents = if has_artist {
            mul_bp_half_even(net_cents, fees.artist_bp)?
        } else {
            0
        };
        // remainder goes to the platform so the split always reconciles
        let platform_cents = net_cents - recipient_cents - artist_cents;

        Ok(Self {
            gross_cents,
            fee_cents,
            net_cents,
            recipient_cents,
            platform_cents,
            artist_cents,
        })
    }
}

/// 1234567 -> "1,234,567"
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Human readable roll chance: "70%", "0.01% (about 1 in 10,000)"
pub fn format_odds(roll_chance: f64) -> String {
    if roll_chance <= 0.0 {
        return "Not rollable".to_string();
    }
    if roll_chance >= 1.0 {
        return format!("{roll_chance}%");
    }
    let one_in = (100.0 / roll_chance).round() as u64;
    format!("{roll_chance}% (about 1 in {})", group_thousands(one_in))
}

/// 941 -> "$9.41"
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}${}.{:02}", abs / 100, abs % 100)
}
