use core::fmt;

/// Semantic shape of a variable's value. Storage is always a flat row-major slice.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum Shape {
    #[default]
    Scalar,
    Vector(usize),
    Array(Vec<usize>),
}

impl Shape {
    /// Number of flat entries.
    pub fn size(&self) -> usize {
        match self {
            Shape::Scalar => 1,
            Shape::Vector(n) => *n,
            Shape::Array(dims) => dims.iter().product(),
        }
    }

    pub fn dims(&self) -> Vec<usize> {
        match self {
            Shape::Scalar => Vec::new(),
            Shape::Vector(n) => vec![*n],
            Shape::Array(dims) => dims.clone(),
        }
    }

    /// Shapes connect only when their dimensions are identical.
    pub fn is_compatible(&self, other: &Shape) -> bool {
        self.dims() == other.dims()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Scalar => write!(f, "scalar"),
            Shape::Vector(n) => write!(f, "({n},)"),
            Shape::Array(dims) => {
                write!(f, "(")?;
                for (i, d) in dims.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{d}")?;
                }
                write!(f, ")")
            }
        }
    }
}
