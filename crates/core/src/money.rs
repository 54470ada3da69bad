use rust_decimal::Decimal;
use thiserror::Error;

/// Amounts are stored with at most this many fractional digits.
pub const MONEY_SCALE: u32 = 2;

/// Largest whole-unit value a single amount may take (10^15).
const MAX_AMOUNT_UNITS: i64 = 1_000_000_000_000_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("{field} must not be negative")]
    Negative { field: &'static str },
    #[error("{field} has more than two decimal places")]
    TooPrecise { field: &'static str },
    #[error("{field} exceeds the largest accepted amount")]
    TooLarge { field: &'static str },
    #[error("total is outside the supported range")]
    Overflow,
}

/// Rejects negative amounts and amounts that cannot be shown to the cent without rounding.
pub fn validate_amount(field: &'static str, amount: Decimal) -> Result<(), AmountError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(AmountError::Negative { field });
    }
    if amount.normalize().scale() > MONEY_SCALE {
        return Err(AmountError::TooPrecise { field });
    }
    if amount > Decimal::from(MAX_AMOUNT_UNITS) {
        return Err(AmountError::TooLarge { field });
    }
    Ok(())
}

/// Adds amounts without panicking on overflow.
pub fn checked_sum<I>(amounts: I) -> Result<Decimal, AmountError>
where
    I: IntoIterator<Item = Decimal>,
{
    amounts.into_iter().try_fold(Decimal::ZERO, |sum, amount| {
        sum.checked_add(amount).ok_or(AmountError::Overflow)
    })
}

/// Currency context that drives separators and symbol placement on documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Currency {
    Idr,
    Usd,
}

impl Currency {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "IDR" => Some(Self::Idr),
            "USD" => Some(Self::Usd),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Idr => "IDR",
            Self::Usd => "USD",
        }
    }

    fn style(self) -> NumberStyle {
        match self {
            Self::Idr => NumberStyle {
                symbol: "Rp ",
                thousands: '.',
                decimal: ',',
            },
            Self::Usd => NumberStyle {
                symbol: "$",
                thousands: ',',
                decimal: '.',
            },
        }
    }

    /// Formats an amount with two fractional digits, e.g. `Rp 1.234.567,00` or `$1,234,567.00`.
    ///
    /// Amounts that pass [`validate_amount`] are printed exactly.
    pub fn format(self, amount: Decimal) -> String {
        let style = self.style();
        let mut value = amount.abs();
        value.rescale(MONEY_SCALE);
        let digits = value.to_string();
        let (integer, fraction) = digits.split_once('.').unwrap_or((digits.as_str(), "00"));

        let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
        for (index, ch) in integer.chars().enumerate() {
            if index > 0 && (integer.len() - index) % 3 == 0 {
                grouped.push(style.thousands);
            }
            grouped.push(ch);
        }

        let sign = if amount.is_sign_negative() && !amount.is_zero() {
            "-"
        } else {
            ""
        };
        format!("{sign}{}{grouped}{}{fraction}", style.symbol, style.decimal)
    }
}

struct NumberStyle {
    symbol: &'static str,
    thousands: char,
    decimal: char,
}
