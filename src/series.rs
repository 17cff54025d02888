//! Truncated series in rational powers of a small parameter.
//!
//! A [`TruncatedSeries`] is a finite sum
//!
//! ```text
//! S(x) = Σ cₖ x^pₖ (ln x)^qₖ,      pₖ ∈ ℚ, qₖ ∈ ℕ,  pₖ ≤ N
//! ```
//!
//! known only up to a maximum power `N`. Products, inverses and quotients
//! discard every term beyond `N`, so post-Newtonian expressions can be
//! combined without ever manufacturing terms of unknown accuracy.
//!
//! Logarithms are opaque symbols: `(ln x)^q` only contributes its
//! multiplicity `q` to the ordering and is never simplified.

use std::cmp::Ordering;
use std::fmt;

use num_rational::Rational64;
use num_traits::{Signed, Zero};

use crate::error::SeriesError;
use crate::real::{to_f64, Real};

/// Name of the PN velocity parameter `v`.
pub const PN_VELOCITY: &str = "v";

/// A post-Newtonian truncation order.
///
/// `PnOrder::new(7, 2)` is "3.5PN": terms up to `v^7` beyond the leading
/// order are retained. The default is unbounded, i.e. every implemented term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PnOrder(Option<Rational64>);

impl PnOrder {
    /// Keep every implemented term.
    pub const UNBOUNDED: PnOrder = PnOrder(None);

    /// PN order `numer / denom`.
    ///
    /// # Panics
    /// Panics if `denom` is zero.
    pub fn new(numer: i64, denom: i64) -> Self {
        Self(Some(Rational64::new(numer, denom)))
    }

    /// PN order given as a rational number.
    pub fn from_ratio(order: Rational64) -> Self {
        Self(Some(order))
    }

    /// The order as a rational number, `None` when unbounded.
    pub fn value(&self) -> Option<Rational64> {
        self.0
    }

    /// Whether every term is retained.
    pub fn is_unbounded(&self) -> bool {
        self.0.is_none()
    }

    /// Maximum relative power of `v` kept at this order (twice the PN order).
    pub fn max_power(&self) -> Option<Rational64> {
        self.0.map(|n| n * Rational64::from_integer(2))
    }
}

impl fmt::Display for PnOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(n) => write!(f, "{}PN", to_decimal(n)),
            None => write!(f, "unbounded"),
        }
    }
}

fn to_decimal(r: Rational64) -> String {
    if r.is_integer() {
        r.to_integer().to_string()
    } else {
        format!("{}", *r.numer() as f64 / *r.denom() as f64)
    }
}

/// The smaller of two truncation powers, where `None` is unbounded.
fn min_power(a: Option<Rational64>, b: Option<Rational64>) -> Option<Rational64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

fn within(power: Rational64, limit: Option<Rational64>) -> bool {
    limit.map_or(true, |n| power <= n)
}

/// One term `coeff · x^power · (ln x)^log_power`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Term<T> {
    /// Numeric coefficient
    pub coeff: T,
    /// Rational exponent of the expansion parameter
    pub power: Rational64,
    /// Exponent of the logarithm of the expansion parameter
    pub log_power: u32,
}

impl<T: Real> Term<T> {
    /// Create a term.
    pub fn new(coeff: T, power: Rational64, log_power: u32) -> Self {
        Self {
            coeff,
            power,
            log_power,
        }
    }

    fn key_cmp(&self, other: &Self) -> Ordering {
        (self.power, self.log_power).cmp(&(other.power, other.log_power))
    }

    fn same_key(&self, other: &Self) -> bool {
        self.power == other.power && self.log_power == other.log_power
    }
}

/// A series in one expansion variable, truncated at a maximum power.
///
/// Terms are kept in canonical order (by power, then log power) with merged
/// duplicates and no zero coefficients, so two series with the same terms
/// compare equal.
#[derive(Debug, Clone, PartialEq)]
pub struct TruncatedSeries<T> {
    variable: &'static str,
    max_power: Option<Rational64>,
    terms: Vec<Term<T>>,
}

impl<T: Real> TruncatedSeries<T> {
    /// Build a series from `(coeff, power, log_power)` triples.
    ///
    /// Terms beyond `max_power` are dropped; repeated keys are summed.
    pub fn new<I>(variable: &'static str, max_power: Option<Rational64>, terms: I) -> Self
    where
        I: IntoIterator<Item = (T, Rational64, u32)>,
    {
        let terms = terms
            .into_iter()
            .map(|(c, p, q)| Term::new(c, p, q))
            .collect();
        Self::from_terms(variable, max_power, terms)
    }

    fn from_terms(
        variable: &'static str,
        max_power: Option<Rational64>,
        mut terms: Vec<Term<T>>,
    ) -> Self {
        terms.retain(|t| within(t.power, max_power));
        terms.sort_by(|a, b| a.key_cmp(b));

        let mut merged: Vec<Term<T>> = Vec::with_capacity(terms.len());
        for term in terms {
            match merged.last_mut() {
                Some(last) if last.same_key(&term) => last.coeff += term.coeff,
                _ => merged.push(term),
            }
        }
        merged.retain(|t| t.coeff != T::zero());

        Self {
            variable,
            max_power,
            terms: merged,
        }
    }

    /// The zero series.
    pub fn zero(variable: &'static str, max_power: Option<Rational64>) -> Self {
        Self {
            variable,
            max_power,
            terms: Vec::new(),
        }
    }

    /// The multiplicative identity `1`, untruncated.
    pub fn identity(variable: &'static str) -> Self {
        Self::constant(variable, None, T::one())
    }

    /// A constant series `c`.
    pub fn constant(variable: &'static str, max_power: Option<Rational64>, c: T) -> Self {
        Self::new(variable, max_power, [(c, Rational64::zero(), 0)])
    }

    /// Expansion variable name.
    pub fn variable(&self) -> &'static str {
        self.variable
    }

    /// Maximum power retained, `None` when untruncated.
    pub fn max_power(&self) -> Option<Rational64> {
        self.max_power
    }

    /// Terms in canonical order.
    pub fn terms(&self) -> &[Term<T>] {
        &self.terms
    }

    /// Number of non-zero terms.
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Whether the series has no non-zero terms.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Lowest-order term.
    pub fn leading_term(&self) -> Option<&Term<T>> {
        self.terms.first()
    }

    /// Coefficient of `x^power (ln x)^log_power`, zero when absent.
    pub fn coefficient(&self, power: Rational64, log_power: u32) -> T {
        self.terms
            .iter()
            .find(|t| t.power == power && t.log_power == log_power)
            .map_or(T::zero(), |t| t.coeff)
    }

    /// Highest power that is actually present.
    pub fn highest_power(&self) -> Option<Rational64> {
        self.terms.last().map(|t| t.power)
    }

    /// Truncate further at `max_power`.
    pub fn truncate(&self, max_power: Option<Rational64>) -> Self {
        Self::from_terms(
            self.variable,
            min_power(self.max_power, max_power),
            self.terms.clone(),
        )
    }

    fn check_variable(&self, other: &Self) -> Result<(), SeriesError> {
        if self.variable == other.variable {
            Ok(())
        } else {
            Err(SeriesError::MismatchedVariable {
                left: self.variable,
                right: other.variable,
            })
        }
    }

    /// Sum, truncated at the smaller of the two maximum powers.
    pub fn add(&self, other: &Self) -> Result<Self, SeriesError> {
        self.check_variable(other)?;
        let terms = self.terms.iter().chain(other.terms.iter()).copied().collect();
        Ok(Self::from_terms(
            self.variable,
            min_power(self.max_power, other.max_power),
            terms,
        ))
    }

    /// Difference, truncated like [`add`](Self::add).
    pub fn sub(&self, other: &Self) -> Result<Self, SeriesError> {
        self.add(&other.neg())
    }

    /// Negation.
    pub fn neg(&self) -> Self {
        self.scale(-T::one())
    }

    /// Multiply every coefficient by `c`.
    pub fn scale(&self, c: T) -> Self {
        let terms = self
            .terms
            .iter()
            .map(|t| Term::new(t.coeff * c, t.power, t.log_power))
            .collect();
        Self::from_terms(self.variable, self.max_power, terms)
    }

    /// Product, keeping only powers up to the smaller maximum power.
    ///
    /// Log powers add, so `(ln x) · (ln x) = (ln x)²`.
    pub fn mul(&self, other: &Self) -> Result<Self, SeriesError> {
        self.check_variable(other)?;
        let limit = min_power(self.max_power, other.max_power);
        Ok(Self::from_terms(
            self.variable,
            limit,
            convolve(&self.terms, &other.terms, limit),
        ))
    }

    /// Multiplicative inverse.
    ///
    /// Writing `S = c₀ x^p₀ (1 + R)` where every term of `R` has positive
    /// power, the inverse is `c₀⁻¹ x^-p₀ Σₙ (-R)ⁿ`. A series known up to
    /// `x^N` determines `R` only up to relative power `N - p₀`, so the
    /// inverse is known up to `x^(N - 2p₀)` and carries that as its
    /// maximum power. An untruncated series is inverted up to its highest
    /// power present.
    ///
    /// Fails with [`SeriesError::NonInvertibleSeries`] when the series is
    /// empty or its lowest power carries a logarithm.
    pub fn invert(&self) -> Result<Self, SeriesError> {
        let lead = match self.terms.first() {
            Some(lead) => *lead,
            None => {
                return Err(SeriesError::NonInvertibleSeries {
                    power: Rational64::zero(),
                    log_power: 0,
                })
            }
        };
        if lead.log_power != 0 || lead.coeff == T::zero() {
            return Err(SeriesError::NonInvertibleSeries {
                power: lead.power,
                log_power: lead.log_power,
            });
        }
        if let Some(log_term) = self.terms[1..].iter().find(|t| t.power == lead.power) {
            return Err(SeriesError::NonInvertibleSeries {
                power: log_term.power,
                log_power: log_term.log_power,
            });
        }

        let limit = self.max_power.or_else(|| self.highest_power());
        // Relative powers of R are measured from p₀
        let rel_limit = limit.map(|n| n - lead.power);
        let declared = self
            .max_power
            .map(|n| n - lead.power * Rational64::from_integer(2));
        let inv_c0 = T::one() / lead.coeff;

        let minus_r: Vec<Term<T>> = self.terms[1..]
            .iter()
            .map(|t| Term::new(-t.coeff * inv_c0, t.power - lead.power, t.log_power))
            .filter(|t| within(t.power, rel_limit))
            .collect();

        let mut sum = vec![Term::new(T::one(), Rational64::zero(), 0)];
        let mut power_term = sum.clone();
        loop {
            power_term = convolve(&power_term, &minus_r, rel_limit);
            if power_term.is_empty() {
                break;
            }
            sum.extend_from_slice(&power_term);
        }

        let terms = sum
            .into_iter()
            .map(|t| Term::new(t.coeff * inv_c0, t.power - lead.power, t.log_power))
            .collect();
        Ok(Self::from_terms(self.variable, declared, terms))
    }

    /// Quotient `self / other = self · other⁻¹`.
    pub fn div(&self, other: &Self) -> Result<Self, SeriesError> {
        self.check_variable(other)?;
        self.mul(&other.invert()?)
    }

    /// Evaluate at `x`, with `ln x` taken literally.
    pub fn evaluate(&self, x: T) -> T {
        let ln_x = x.ln();
        self.terms.iter().fold(T::zero(), |acc, t| {
            let mut value = t.coeff * rational_pow(x, t.power);
            if t.log_power > 0 {
                value *= ln_x.powi(t.log_power as i32);
            }
            acc + value
        })
    }
}

/// `x^p` for a rational exponent, using integer powers when possible.
pub(crate) fn rational_pow<T: Real>(x: T, p: Rational64) -> T {
    if p.is_zero() {
        T::one()
    } else if p.is_integer() && p.abs() <= Rational64::from_integer(i32::MAX as i64) {
        x.powi(p.to_integer() as i32)
    } else {
        let exponent: T = nalgebra::convert::<f64, T>(*p.numer() as f64 / *p.denom() as f64);
        x.powf(exponent)
    }
}

/// All pairwise products with power at most `limit`, not yet canonical.
fn convolve<T: Real>(a: &[Term<T>], b: &[Term<T>], limit: Option<Rational64>) -> Vec<Term<T>> {
    let mut out = Vec::with_capacity(a.len() * b.len());
    for ta in a {
        for tb in b {
            let power = ta.power + tb.power;
            if within(power, limit) {
                out.push(Term::new(ta.coeff * tb.coeff, power, ta.log_power + tb.log_power));
            }
        }
    }
    let mut out = TruncatedSeries::from_terms("", limit, out).terms;
    out.shrink_to_fit();
    out
}

impl<T: Real> fmt::Display for TruncatedSeries<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terms.is_empty() {
            write!(f, "0")?;
        }
        for (i, t) in self.terms.iter().enumerate() {
            if i > 0 {
                write!(f, " + ")?;
            }
            write!(f, "{}", to_f64(t.coeff))?;
            if !t.power.is_zero() {
                write!(f, " {}^({})", self.variable, t.power)?;
            }
            match t.log_power {
                0 => {}
                1 => write!(f, " ln({})", self.variable)?,
                q => write!(f, " ln({})^{}", self.variable, q)?,
            }
        }
        match self.max_power {
            // Every omitted term has power above N
            Some(n) => write!(f, " + o({}^({}))", self.variable, n),
            None => Ok(()),
        }
    }
}
