// mdo-core/src/units.rs

//! Runtime unit expressions for variables declared by components.
//!
//! Components declare units as strings (`"N*m**2"`, `"kg/(m*s)"`, `"rpm"`).
//! They are parsed once when the variable registry is built into a dimension
//! vector plus an affine map to SI. Scale factors for the atomic symbols come
//! from the `uom` SI unit definitions.

use core::fmt;

use crate::MdoError;

/// Number of tracked base dimensions.
pub const DIMS: usize = 9;

const DIM_NAMES: [&str; DIMS] = [
    "length",
    "mass",
    "time",
    "current",
    "temperature",
    "amount",
    "luminosity",
    "angle",
    "currency",
];

/// Exponents of the base dimensions (SI base + plane angle + currency).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Dimension([i8; DIMS]);

impl Dimension {
    pub const NONE: Dimension = Dimension([0; DIMS]);

    pub const fn new(exponents: [i8; DIMS]) -> Self {
        Self(exponents)
    }

    const fn base(slot: usize) -> Self {
        let mut e = [0; DIMS];
        e[slot] = 1;
        Self(e)
    }

    pub fn exponents(&self) -> [i8; DIMS] {
        self.0
    }

    pub fn is_dimensionless(&self) -> bool {
        self.0.iter().all(|e| *e == 0)
    }

    fn mul(self, other: Self) -> Self {
        let mut e = self.0;
        for (a, b) in e.iter_mut().zip(other.0) {
            *a += b;
        }
        Self(e)
    }

    fn powi(self, n: i8) -> Self {
        let mut e = self.0;
        for a in e.iter_mut() {
            *a *= n;
        }
        Self(e)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dimensionless() {
            return write!(f, "dimensionless");
        }
        let mut first = true;
        for (name, e) in DIM_NAMES.iter().zip(self.0) {
            if e == 0 {
                continue;
            }
            if !first {
                write!(f, "*")?;
            }
            first = false;
            if e == 1 {
                write!(f, "{name}")?;
            } else {
                write!(f, "{name}^{e}")?;
            }
        }
        Ok(())
    }
}

const LENGTH: Dimension = Dimension::base(0);
const MASS: Dimension = Dimension::base(1);
const TIME: Dimension = Dimension::base(2);
const CURRENT: Dimension = Dimension::base(3);
const TEMPERATURE: Dimension = Dimension::base(4);
const AMOUNT: Dimension = Dimension::base(5);
const LUMINOSITY: Dimension = Dimension::base(6);
const ANGLE: Dimension = Dimension::base(7);
const CURRENCY: Dimension = Dimension::base(8);
const FORCE: Dimension = Dimension::new([1, 1, -2, 0, 0, 0, 0, 0, 0]);
const PRESSURE: Dimension = Dimension::new([-1, 1, -2, 0, 0, 0, 0, 0, 0]);
const ENERGY: Dimension = Dimension::new([2, 1, -2, 0, 0, 0, 0, 0, 0]);
const POWER: Dimension = Dimension::new([2, 1, -3, 0, 0, 0, 0, 0, 0]);
const FREQUENCY: Dimension = Dimension::new([0, 0, -1, 0, 0, 0, 0, 0, 0]);
const VELOCITY: Dimension = Dimension::new([1, 0, -1, 0, 0, 0, 0, 0, 0]);
const ANGULAR_VELOCITY: Dimension = Dimension::new([0, 0, -1, 0, 0, 0, 0, 1, 0]);

/// An atomic unit symbol: dimension, scale to SI and additive offset.
#[derive(Clone, Copy, Debug)]
struct Atom {
    dim: Dimension,
    scale: f64,
    offset: f64,
}

impl Atom {
    fn linear(dim: Dimension, scale: f64) -> Self {
        Self {
            dim,
            scale,
            offset: 0.0,
        }
    }
}

fn atom(symbol: &str) -> Option<Atom> {
    use uom::si::f64 as q;
    use uom::si::{
        amount_of_substance, angle, electric_current, energy, force, frequency, length,
        luminous_intensity, mass, power, pressure, thermodynamic_temperature, time, velocity,
    };

    let a = match symbol {
        "m" => Atom::linear(LENGTH, q::Length::new::<length::meter>(1.0).value),
        "mm" => Atom::linear(LENGTH, q::Length::new::<length::millimeter>(1.0).value),
        "cm" => Atom::linear(LENGTH, q::Length::new::<length::centimeter>(1.0).value),
        "km" => Atom::linear(LENGTH, q::Length::new::<length::kilometer>(1.0).value),
        "ft" => Atom::linear(LENGTH, q::Length::new::<length::foot>(1.0).value),
        "inch" => Atom::linear(LENGTH, q::Length::new::<length::inch>(1.0).value),
        "kg" => Atom::linear(MASS, q::Mass::new::<mass::kilogram>(1.0).value),
        "g" => Atom::linear(MASS, q::Mass::new::<mass::gram>(1.0).value),
        "t" => Atom::linear(MASS, 1000.0 * q::Mass::new::<mass::kilogram>(1.0).value),
        "s" => Atom::linear(TIME, q::Time::new::<time::second>(1.0).value),
        "min" => Atom::linear(TIME, q::Time::new::<time::minute>(1.0).value),
        "h" => Atom::linear(TIME, q::Time::new::<time::hour>(1.0).value),
        "d" => Atom::linear(TIME, q::Time::new::<time::day>(1.0).value),
        "year" => Atom::linear(TIME, q::Time::new::<time::year>(1.0).value),
        "N" => Atom::linear(FORCE, q::Force::new::<force::newton>(1.0).value),
        "kN" => Atom::linear(FORCE, q::Force::new::<force::kilonewton>(1.0).value),
        "MN" => Atom::linear(FORCE, q::Force::new::<force::meganewton>(1.0).value),
        "Pa" => Atom::linear(PRESSURE, q::Pressure::new::<pressure::pascal>(1.0).value),
        "kPa" => Atom::linear(PRESSURE, q::Pressure::new::<pressure::kilopascal>(1.0).value),
        "MPa" => Atom::linear(PRESSURE, q::Pressure::new::<pressure::megapascal>(1.0).value),
        "GPa" => Atom::linear(PRESSURE, q::Pressure::new::<pressure::gigapascal>(1.0).value),
        "bar" => Atom::linear(PRESSURE, q::Pressure::new::<pressure::bar>(1.0).value),
        "J" => Atom::linear(ENERGY, q::Energy::new::<energy::joule>(1.0).value),
        "kJ" => Atom::linear(ENERGY, q::Energy::new::<energy::kilojoule>(1.0).value),
        "MJ" => Atom::linear(ENERGY, q::Energy::new::<energy::megajoule>(1.0).value),
        "kWh" => Atom::linear(ENERGY, q::Energy::new::<energy::kilowatt_hour>(1.0).value),
        "MWh" => Atom::linear(
            ENERGY,
            1000.0 * q::Energy::new::<energy::kilowatt_hour>(1.0).value,
        ),
        "W" => Atom::linear(POWER, q::Power::new::<power::watt>(1.0).value),
        "kW" => Atom::linear(POWER, q::Power::new::<power::kilowatt>(1.0).value),
        "MW" => Atom::linear(POWER, q::Power::new::<power::megawatt>(1.0).value),
        "GW" => Atom::linear(POWER, q::Power::new::<power::gigawatt>(1.0).value),
        "Hz" => Atom::linear(FREQUENCY, q::Frequency::new::<frequency::hertz>(1.0).value),
        "kph" => Atom::linear(
            VELOCITY,
            q::Velocity::new::<velocity::kilometer_per_hour>(1.0).value,
        ),
        "rad" => Atom::linear(ANGLE, q::Angle::new::<angle::radian>(1.0).value),
        "deg" => Atom::linear(ANGLE, q::Angle::new::<angle::degree>(1.0).value),
        "rev" => Atom::linear(ANGLE, q::Angle::new::<angle::revolution>(1.0).value),
        "rpm" => Atom::linear(
            ANGULAR_VELOCITY,
            q::Angle::new::<angle::revolution>(1.0).value
                / q::Time::new::<time::minute>(1.0).value,
        ),
        "K" => Atom::linear(
            TEMPERATURE,
            q::ThermodynamicTemperature::new::<thermodynamic_temperature::kelvin>(1.0).value,
        ),
        "degC" => {
            let zero = q::ThermodynamicTemperature::new::<thermodynamic_temperature::degree_celsius>(
                0.0,
            )
            .value;
            Atom {
                dim: TEMPERATURE,
                scale: 1.0,
                offset: zero,
            }
        }
        "A" => Atom::linear(
            CURRENT,
            q::ElectricCurrent::new::<electric_current::ampere>(1.0).value,
        ),
        "mol" => Atom::linear(
            AMOUNT,
            q::AmountOfSubstance::new::<amount_of_substance::mole>(1.0).value,
        ),
        "cd" => Atom::linear(
            LUMINOSITY,
            q::LuminousIntensity::new::<luminous_intensity::candela>(1.0).value,
        ),
        "USD" => Atom::linear(CURRENCY, 1.0),
        "kUSD" => Atom::linear(CURRENCY, 1.0e3),
        "MUSD" => Atom::linear(CURRENCY, 1.0e6),
        "percent" => Atom::linear(Dimension::NONE, 0.01),
        "unitless" => Atom::linear(Dimension::NONE, 1.0),
        _ => return None,
    };
    Some(a)
}

/// Affine conversion `to = from * scale + offset` between two compatible units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Conversion {
    pub scale: f64,
    pub offset: f64,
}

impl Conversion {
    pub const IDENTITY: Conversion = Conversion {
        scale: 1.0,
        offset: 0.0,
    };

    #[inline]
    pub fn apply(&self, v: f64) -> f64 {
        v * self.scale + self.offset
    }

    pub fn is_identity(&self) -> bool {
        self.scale == 1.0 && self.offset == 0.0
    }
}

/// A parsed unit expression.
#[derive(Clone, Debug, PartialEq)]
pub struct Unit {
    expr: String,
    dim: Dimension,
    scale: f64,
    offset: f64,
}

impl Unit {
    /// The unit of a quantity without physical dimension.
    pub fn dimensionless() -> Self {
        Self {
            expr: String::new(),
            dim: Dimension::NONE,
            scale: 1.0,
            offset: 0.0,
        }
    }

    /// Parse a unit expression such as `kg/(m*s)` or `N*m**2`.
    pub fn parse(expr: &str) -> Result<Self, MdoError> {
        let trimmed = expr.trim();
        if trimmed.is_empty() || trimmed == "1" {
            return Ok(Self::dimensionless());
        }
        let tokens = tokenize(trimmed)?;
        let mut parser = Parser {
            expr: trimmed,
            tokens: &tokens,
            pos: 0,
        };
        let (dim, scale, offset) = parser.term()?;
        if parser.pos != tokens.len() {
            return Err(invalid(trimmed, "unexpected trailing input"));
        }
        Ok(Self {
            expr: trimmed.to_string(),
            dim,
            scale,
            offset,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    pub fn dimension(&self) -> Dimension {
        self.dim
    }

    pub fn is_dimensionless(&self) -> bool {
        self.dim.is_dimensionless()
    }

    /// Convert a value in this unit to SI.
    pub fn to_si(&self, v: f64) -> f64 {
        v * self.scale + self.offset
    }

    pub fn is_compatible(&self, other: &Unit) -> bool {
        self.dim == other.dim
    }

    /// Conversion from values expressed in `self` to values expressed in `target`.
    pub fn conversion_to(&self, target: &Unit) -> Option<Conversion> {
        if !self.is_compatible(target) {
            return None;
        }
        Some(Conversion {
            scale: self.scale / target.scale,
            offset: (self.offset - target.offset) / target.scale,
        })
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.expr.is_empty() {
            write!(f, "1")
        } else {
            write!(f, "{}", self.expr)
        }
    }
}

fn invalid(expr: &str, reason: impl Into<String>) -> MdoError {
    MdoError::InvalidUnit {
        expr: expr.to_string(),
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Int(i32),
    Mul,
    Div,
    Pow,
    LParen,
    RParen,
}

fn tokenize(expr: &str) -> Result<Vec<Tok>, MdoError> {
    let chars: Vec<char> = expr.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '*' if chars.get(i + 1) == Some(&'*') => {
                out.push(Tok::Pow);
                i += 2;
            }
            '*' => {
                out.push(Tok::Mul);
                i += 1;
            }
            '^' => {
                out.push(Tok::Pow);
                i += 1;
            }
            '/' => {
                out.push(Tok::Div);
                i += 1;
            }
            '(' => {
                out.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                out.push(Tok::RParen);
                i += 1;
            }
            '-' | '0'..='9' => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<i32>()
                    .map_err(|_| invalid(expr, format!("bad integer '{text}'")))?;
                out.push(Tok::Int(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                out.push(Tok::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(invalid(expr, format!("unexpected character '{other}'"))),
        }
    }
    Ok(out)
}

struct Parser<'a> {
    expr: &'a str,
    tokens: &'a [Tok],
    pos: usize,
}

type Factor = (Dimension, f64, f64);

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Tok> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Tok> {
        let t = self.tokens.get(self.pos);
        self.pos += 1;
        t
    }

    fn term(&mut self) -> Result<Factor, MdoError> {
        let mut acc = self.factor()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Mul) => 1,
                Some(Tok::Div) => -1,
                _ => break,
            };
            self.pos += 1;
            let (dim, scale, offset) = self.factor()?;
            if offset != 0.0 || acc.2 != 0.0 {
                return Err(invalid(
                    self.expr,
                    "offset units (degC) cannot be combined with other units",
                ));
            }
            acc = if op > 0 {
                (acc.0.mul(dim), acc.1 * scale, 0.0)
            } else {
                (acc.0.mul(dim.powi(-1)), acc.1 / scale, 0.0)
            };
        }
        Ok(acc)
    }

    fn factor(&mut self) -> Result<Factor, MdoError> {
        let base = self.primary()?;
        if matches!(self.peek(), Some(Tok::Pow)) {
            self.pos += 1;
            let n = match self.next() {
                Some(Tok::Int(n)) => *n,
                _ => return Err(invalid(self.expr, "exponent must be an integer")),
            };
            if base.2 != 0.0 && n != 1 {
                return Err(invalid(self.expr, "offset units cannot be raised to a power"));
            }
            let n8 = i8::try_from(n).map_err(|_| invalid(self.expr, "exponent out of range"))?;
            return Ok((base.0.powi(n8), base.1.powi(n), if n == 1 { base.2 } else { 0.0 }));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Factor, MdoError> {
        match self.next().cloned() {
            Some(Tok::Ident(name)) => {
                let a = atom(&name)
                    .ok_or_else(|| invalid(self.expr, format!("unknown unit '{name}'")))?;
                Ok((a.dim, a.scale, a.offset))
            }
            Some(Tok::Int(1)) => Ok((Dimension::NONE, 1.0, 0.0)),
            Some(Tok::LParen) => {
                let inner = self.term()?;
                match self.next() {
                    Some(Tok::RParen) => Ok(inner),
                    _ => Err(invalid(self.expr, "missing ')'")),
                }
            }
            _ => Err(invalid(self.expr, "expected a unit symbol")),
        }
    }
}
