//! Optimization problem definition: design variables, objective and constraints.

use mdo_core::{VarId, VarKind, Values};
use mdo_derivs::TotalJacobian;
use mdo_graph::Graph;
use nalgebra::{DMatrix, DVector};

use crate::error::{DriverError, DriverResult};

/// A free input exposed to the optimizer.
///
/// The optimizer works in scaled space, `scaled = (value + adder) * scaler`.
#[derive(Clone, Debug)]
pub struct DesignVar {
    pub id: VarId,
    pub path: String,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    /// Starting value; the run context's current value when `None`.
    pub initial: Option<Vec<f64>>,
    pub scaler: f64,
    pub adder: f64,
}

impl DesignVar {
    pub fn size(&self) -> usize {
        self.lower.len()
    }

    /// Same bounds for every entry.
    pub fn bounds(&mut self, lower: f64, upper: f64) -> &mut Self {
        self.lower.fill(lower);
        self.upper.fill(upper);
        self
    }

    /// Per-entry bounds; lengths are checked by [`OptProblem::validate`].
    pub fn bounds_per_entry(&mut self, lower: Vec<f64>, upper: Vec<f64>) -> &mut Self {
        self.lower = lower;
        self.upper = upper;
        self
    }

    pub fn initial(&mut self, value: Vec<f64>) -> &mut Self {
        self.initial = Some(value);
        self
    }

    pub fn scaling(&mut self, scaler: f64, adder: f64) -> &mut Self {
        self.scaler = scaler;
        self.adder = adder;
        self
    }

    fn scale(&self, v: f64) -> f64 {
        (v + self.adder) * self.scaler
    }

    fn unscale(&self, s: f64) -> f64 {
        s / self.scaler - self.adder
    }
}

/// A variable read as a response: the whole variable, or one flat entry.
#[derive(Clone, Debug)]
pub struct Response {
    pub id: VarId,
    pub path: String,
    pub index: Option<usize>,
    pub scaler: f64,
}

impl Response {
    /// Use a single flat entry of a vector variable.
    pub fn index(&mut self, index: usize) -> &mut Self {
        self.index = Some(index);
        self
    }

    pub fn scaler(&mut self, scaler: f64) -> &mut Self {
        self.scaler = scaler;
        self
    }

    fn rows(&self, graph: &Graph) -> Vec<usize> {
        match self.index {
            Some(i) => vec![i],
            None => (0..graph.var(self.id).size()).collect(),
        }
    }

    fn label(&self) -> String {
        match self.index {
            Some(i) => format!("{}[{i}]", self.path),
            None => self.path.clone(),
        }
    }
}

/// Feasible set of a constraint.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ConstraintBound {
    /// `value <= upper`
    Upper(f64),
    /// `value >= lower`
    Lower(f64),
    /// `lower <= value <= upper`
    Range { lower: f64, upper: f64 },
    /// `value == target`
    Equals(f64),
}

impl ConstraintBound {
    pub fn is_equality(&self) -> bool {
        matches!(self, ConstraintBound::Equals(_))
    }

    /// Amount by which `value` lies outside the feasible set.
    pub fn violation(&self, value: f64) -> f64 {
        match *self {
            ConstraintBound::Upper(u) => (value - u).max(0.0),
            ConstraintBound::Lower(l) => (l - value).max(0.0),
            ConstraintBound::Range { lower, upper } => (lower - value).max(value - upper).max(0.0),
            ConstraintBound::Equals(t) => (value - t).abs(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Constraint {
    pub response: Response,
    pub bound: ConstraintBound,
}

/// Responses and sensitivities of one evaluated point in scaled space.
///
/// Inequalities are `g <= 0`, equalities `h = 0`.
#[derive(Clone, Debug)]
pub(crate) struct ScaledResponses {
    pub f: f64,
    pub g: DVector<f64>,
    pub h: DVector<f64>,
    pub grad_f: Option<DVector<f64>>,
    pub jac_g: Option<DMatrix<f64>>,
    pub jac_h: Option<DMatrix<f64>>,
    /// Unscaled value of every constraint entry, in declaration order.
    pub raw_constraints: Vec<f64>,
    pub raw_objective: f64,
}

/// A design problem over a built graph.
///
/// Names are resolved as they are added, so a typo fails at the call that
/// introduced it rather than at the first evaluation.
#[derive(Debug)]
pub struct OptProblem<'g> {
    graph: &'g Graph,
    pub name: String,
    design_vars: Vec<DesignVar>,
    objective: Option<Response>,
    constraints: Vec<Constraint>,
}

impl<'g> OptProblem<'g> {
    pub fn new(graph: &'g Graph, name: impl Into<String>) -> Self {
        Self {
            graph,
            name: name.into(),
            design_vars: Vec::new(),
            objective: None,
            constraints: Vec::new(),
        }
    }

    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    /// Expose the free input `path` to the optimizer. Bounds start from the
    /// variable's declared bounds (unbounded where none are declared).
    pub fn design_var(&mut self, path: &str) -> DriverResult<&mut DesignVar> {
        let id = self.graph.resolve(path)?;
        let info = self.graph.var(id);
        if info.kind() != VarKind::Input {
            return Err(DriverError::problem(format!(
                "design variable '{path}' is not an input"
            )));
        }
        if !self.graph.is_free_input(id) {
            return Err(DriverError::problem(format!(
                "design variable '{path}' is connected to an upstream output"
            )));
        }
        if self.design_vars.iter().any(|d| d.id == id) {
            return Err(DriverError::problem(format!(
                "design variable '{path}' added twice"
            )));
        }
        let n = info.size();
        self.design_vars.push(DesignVar {
            id,
            path: info.path.clone(),
            lower: vec![info.meta.lower.unwrap_or(f64::NEG_INFINITY); n],
            upper: vec![info.meta.upper.unwrap_or(f64::INFINITY); n],
            initial: None,
            scaler: 1.0,
            adder: 0.0,
        });
        let last = self.design_vars.len() - 1;
        Ok(&mut self.design_vars[last])
    }

    /// Minimize `path`. Vector variables need an index.
    pub fn objective(&mut self, path: &str) -> DriverResult<&mut Response> {
        let response = self.response(path)?;
        Ok(self.objective.insert(response))
    }

    pub fn constraint(&mut self, path: &str, bound: ConstraintBound) -> DriverResult<&mut Response> {
        let response = self.response(path)?;
        self.constraints.push(Constraint { response, bound });
        let last = self.constraints.len() - 1;
        Ok(&mut self.constraints[last].response)
    }

    pub fn constraint_upper(&mut self, path: &str, upper: f64) -> DriverResult<&mut Response> {
        self.constraint(path, ConstraintBound::Upper(upper))
    }

    pub fn constraint_lower(&mut self, path: &str, lower: f64) -> DriverResult<&mut Response> {
        self.constraint(path, ConstraintBound::Lower(lower))
    }

    pub fn constraint_range(
        &mut self,
        path: &str,
        lower: f64,
        upper: f64,
    ) -> DriverResult<&mut Response> {
        self.constraint(path, ConstraintBound::Range { lower, upper })
    }

    pub fn constraint_equals(&mut self, path: &str, target: f64) -> DriverResult<&mut Response> {
        self.constraint(path, ConstraintBound::Equals(target))
    }

    fn response(&self, path: &str) -> DriverResult<Response> {
        let id = self.graph.resolve(path)?;
        Ok(Response {
            id,
            path: self.graph.var(id).path.clone(),
            index: None,
            scaler: 1.0,
        })
    }

    pub fn design_vars(&self) -> &[DesignVar] {
        &self.design_vars
    }

    pub fn objective_response(&self) -> Option<&Response> {
        self.objective.as_ref()
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Total number of scalar design entries.
    pub fn size(&self) -> usize {
        self.design_vars.iter().map(DesignVar::size).sum()
    }

    /// Labels of the constraint entries, `path` or `path[i]`.
    pub fn constraint_labels(&self) -> Vec<String> {
        let mut labels = Vec::new();
        for c in &self.constraints {
            let rows = c.response.rows(self.graph);
            if rows.len() == 1 {
                labels.push(c.response.label());
            } else {
                labels.extend(rows.iter().map(|r| format!("{}[{r}]", c.response.path)));
            }
        }
        labels
    }

    /// Check everything that can be checked without evaluating.
    pub fn validate(&self) -> DriverResult<()> {
        if self.design_vars.is_empty() {
            return Err(DriverError::problem("no design variables"));
        }
        let objective = self
            .objective
            .as_ref()
            .ok_or_else(|| DriverError::problem("no objective"))?;
        self.check_response(objective)?;
        if objective.index.is_none() && self.graph.var(objective.id).size() != 1 {
            return Err(DriverError::problem(format!(
                "objective '{}' is not scalar; select an entry with an index",
                objective.path
            )));
        }
        for c in &self.constraints {
            self.check_response(&c.response)?;
            if let ConstraintBound::Range { lower, upper } = c.bound {
                if lower > upper {
                    return Err(DriverError::problem(format!(
                        "constraint '{}' has an empty range [{lower}, {upper}]",
                        c.response.path
                    )));
                }
            }
        }
        for dv in &self.design_vars {
            let n = self.graph.var(dv.id).size();
            if dv.lower.len() != n || dv.upper.len() != n {
                return Err(DriverError::problem(format!(
                    "design variable '{}' has {} entries but {} / {} bounds",
                    dv.path,
                    n,
                    dv.lower.len(),
                    dv.upper.len()
                )));
            }
            if let Some(init) = &dv.initial {
                if init.len() != n {
                    return Err(DriverError::problem(format!(
                        "design variable '{}' has {} entries but an initial value of {}",
                        dv.path,
                        n,
                        init.len()
                    )));
                }
            }
            if !(dv.scaler.is_finite() && dv.scaler > 0.0 && dv.adder.is_finite()) {
                return Err(DriverError::problem(format!(
                    "design variable '{}' needs a positive finite scaler",
                    dv.path
                )));
            }
            if dv.lower.iter().zip(&dv.upper).any(|(l, u)| l > u || l.is_nan() || u.is_nan()) {
                return Err(DriverError::problem(format!(
                    "design variable '{}' has a lower bound above its upper bound",
                    dv.path
                )));
            }
        }
        Ok(())
    }

    fn check_response(&self, r: &Response) -> DriverResult<()> {
        let n = self.graph.var(r.id).size();
        if let Some(i) = r.index {
            if i >= n {
                return Err(DriverError::problem(format!(
                    "index {i} out of range for '{}' of size {n}",
                    r.path
                )));
            }
        }
        if !(r.scaler.is_finite() && r.scaler > 0.0) {
            return Err(DriverError::problem(format!(
                "response '{}' needs a positive finite scaler",
                r.path
            )));
        }
        Ok(())
    }

    /// Scaled lower and upper bounds of the flat design vector.
    pub(crate) fn scaled_bounds(&self) -> (DVector<f64>, DVector<f64>) {
        let lower = self
            .design_vars
            .iter()
            .flat_map(|d| d.lower.iter().map(move |v| d.scale(*v)));
        let upper = self
            .design_vars
            .iter()
            .flat_map(|d| d.upper.iter().map(move |v| d.scale(*v)));
        (
            DVector::from_iterator(self.size(), lower),
            DVector::from_iterator(self.size(), upper),
        )
    }

    /// Scaled starting point: initial values where given, current values
    /// otherwise.
    pub(crate) fn scaled_start(&self, values: &Values) -> DVector<f64> {
        let mut x = Vec::with_capacity(self.size());
        for dv in &self.design_vars {
            match &dv.initial {
                Some(init) => x.extend(init.iter().map(|v| dv.scale(*v))),
                None => x.extend(
                    values
                        .get(self.graph.var(dv.id))
                        .iter()
                        .map(|v| dv.scale(*v)),
                ),
            }
        }
        DVector::from_vec(x)
    }

    /// Unscaled flat design vector.
    pub(crate) fn unscale(&self, x: &DVector<f64>) -> Vec<f64> {
        let mut out = Vec::with_capacity(x.len());
        let mut k = 0;
        for dv in &self.design_vars {
            for _ in 0..dv.size() {
                out.push(dv.unscale(x[k]));
                k += 1;
            }
        }
        out
    }

    /// Write the scaled design `x` into `values`.
    pub(crate) fn apply(&self, x: &DVector<f64>, values: &mut Values) {
        let flat = self.unscale(x);
        let mut k = 0;
        for dv in &self.design_vars {
            let n = dv.size();
            values
                .get_mut(self.graph.var(dv.id))
                .copy_from_slice(&flat[k..k + n]);
            k += n;
        }
    }

    pub(crate) fn design_ids(&self) -> Vec<VarId> {
        self.design_vars.iter().map(|d| d.id).collect()
    }

    /// Distinct variables read by the objective and constraints.
    pub(crate) fn response_ids(&self) -> Vec<VarId> {
        let mut ids: Vec<VarId> = Vec::new();
        let all = self
            .objective
            .iter()
            .chain(self.constraints.iter().map(|c| &c.response));
        for r in all {
            if !ids.contains(&r.id) {
                ids.push(r.id);
            }
        }
        ids
    }

    pub(crate) fn constraint_counts(&self) -> (usize, usize) {
        let (mut n_ineq, mut n_eq) = (0, 0);
        for c in &self.constraints {
            let rows = c.response.rows(self.graph).len();
            match c.bound {
                ConstraintBound::Equals(_) => n_eq += rows,
                ConstraintBound::Range { .. } => n_ineq += 2 * rows,
                _ => n_ineq += rows,
            }
        }
        (n_ineq, n_eq)
    }

    /// Objective and constraints at `values`, scaled, with their
    /// sensitivities when `jac` is given.
    ///
    /// `jac` holds totals of `response_ids()` with respect to the design
    /// variables listed in `wrt` (a subset of `design_ids()`); columns of
    /// design variables missing from `wrt` are zero.
    pub(crate) fn responses(
        &self,
        values: &Values,
        jac: Option<(&TotalJacobian, &[VarId])>,
    ) -> DriverResult<ScaledResponses> {
        let graph = self.graph;
        let objective = self
            .objective
            .as_ref()
            .ok_or_else(|| DriverError::problem("no objective"))?;
        let n = self.size();
        let (n_ineq, n_eq) = self.constraint_counts();

        // Row of d(response entry)/d(scaled x), if derivatives are present.
        let sens_row = |r: &Response, entry: usize| -> Option<DVector<f64>> {
            let (j, wrt) = jac?;
            let rows = j.of_range(r.id)?;
            let mut out = DVector::zeros(n);
            let mut col = 0;
            for dv in &self.design_vars {
                if wrt.contains(&dv.id) {
                    if let Some(cols) = j.wrt_range(dv.id) {
                        for (k, c) in cols.enumerate() {
                            out[col + k] = j.matrix()[(rows.start + entry, c)] / dv.scaler;
                        }
                    }
                }
                col += dv.size();
            }
            Some(out)
        };

        let obj_entry = objective.index.unwrap_or(0);
        let raw_objective = values.get(graph.var(objective.id))[obj_entry];
        let f = raw_objective * objective.scaler;
        let grad_f = sens_row(objective, obj_entry).map(|g| g * objective.scaler);

        let want_jac = jac.is_some();
        let mut g = DVector::zeros(n_ineq);
        let mut h = DVector::zeros(n_eq);
        let mut jac_g = want_jac.then(|| DMatrix::zeros(n_ineq, n));
        let mut jac_h = want_jac.then(|| DMatrix::zeros(n_eq, n));
        let mut raw_constraints = Vec::new();
        let (mut gi, mut hi) = (0, 0);

        for c in &self.constraints {
            let s = c.response.scaler;
            let var_values = values.get(graph.var(c.response.id));
            for entry in c.response.rows(graph) {
                let v = var_values[entry];
                raw_constraints.push(v);
                let row = sens_row(&c.response, entry).map(|r| r * s);
                let mut push_ineq = |value: f64, sign: f64| {
                    g[gi] = value;
                    if let (Some(jg), Some(r)) = (jac_g.as_mut(), row.as_ref()) {
                        jg.row_mut(gi).copy_from(&(r * sign).transpose());
                    }
                    gi += 1;
                };
                match c.bound {
                    ConstraintBound::Upper(u) => push_ineq(s * (v - u), 1.0),
                    ConstraintBound::Lower(l) => push_ineq(s * (l - v), -1.0),
                    ConstraintBound::Range { lower, upper } => {
                        push_ineq(s * (lower - v), -1.0);
                        push_ineq(s * (v - upper), 1.0);
                    }
                    ConstraintBound::Equals(t) => {
                        h[hi] = s * (v - t);
                        if let (Some(jh), Some(r)) = (jac_h.as_mut(), row.as_ref()) {
                            jh.row_mut(hi).copy_from(&r.transpose());
                        }
                        hi += 1;
                    }
                }
            }
        }

        if want_jac && grad_f.is_none() {
            return Err(DriverError::problem(format!(
                "no derivatives were computed for objective '{}'",
                objective.path
            )));
        }

        Ok(ScaledResponses {
            f,
            g,
            h,
            grad_f,
            jac_g,
            jac_h,
            raw_constraints,
            raw_objective,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdo_components::ExprComponent;
    use mdo_core::VarMeta;
    use mdo_graph::GraphBuilder;

    fn graph() -> Graph {
        let mut b = GraphBuilder::new();
        b.add(
            "geom",
            ExprComponent::new(&["area = w*h", "perim = 2*w + 2*h"])
                .unwrap()
                .var(VarMeta::input("w").bounds(0.5, 4.0).value(1.0))
                .unwrap(),
        );
        b.add("cost", ExprComponent::new(&["c = 3*area"]).unwrap());
        b.connect("geom.area", "cost.area");
        b.build().unwrap()
    }

    #[test]
    fn design_vars_must_be_free_inputs() {
        let g = graph();
        let mut p = OptProblem::new(&g, "box");
        let dv = p.design_var("geom.w").unwrap();
        assert_eq!(dv.lower, vec![0.5]);
        assert_eq!(dv.upper, vec![4.0]);

        assert!(p.design_var("geom.w").is_err());
        assert!(p.design_var("cost.area").is_err());
        assert!(p.design_var("geom.area").is_err());
        assert!(p.design_var("geom.nope").is_err());
        assert!(p.objective("cost.nope").is_err());
    }

    #[test]
    fn validation_catches_missing_pieces() {
        let g = graph();
        let mut p = OptProblem::new(&g, "box");
        assert!(p.validate().is_err());
        p.design_var("geom.h").unwrap().bounds(1.0, 0.0);
        p.objective("cost.c").unwrap();
        assert!(p.validate().is_err());
        p.design_vars[0].bounds(0.0, 1.0);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn constraints_become_scaled_inequalities() {
        let g = graph();
        let mut p = OptProblem::new(&g, "box");
        p.design_var("geom.h").unwrap().bounds(0.0, 5.0);
        p.objective("cost.c").unwrap().scaler(0.5);
        p.constraint_range("geom.perim", 4.0, 8.0).unwrap();
        p.constraint_equals("geom.area", 2.0).unwrap().scaler(10.0);
        assert_eq!(p.constraint_counts(), (2, 1));
        assert_eq!(p.constraint_labels(), vec!["geom.perim", "geom.area"]);

        let mut values = g.registry().initial_values();
        values.get_mut(g.var(g.resolve("geom.perim").unwrap()))[0] = 9.0;
        values.get_mut(g.var(g.resolve("geom.area").unwrap()))[0] = 1.5;
        values.get_mut(g.var(g.resolve("cost.c").unwrap()))[0] = 4.5;
        let r = p.responses(&values, None).unwrap();
        assert_eq!(r.f, 2.25);
        assert_eq!(r.g.as_slice(), &[-5.0, 1.0]);
        assert_eq!(r.h.as_slice(), &[-5.0]);
        assert_eq!(r.raw_constraints, vec![9.0, 1.5]);
    }

    #[test]
    fn scaling_round_trips_through_values() {
        let g = graph();
        let mut p = OptProblem::new(&g, "box");
        p.design_var("geom.h")
            .unwrap()
            .bounds(0.0, 10.0)
            .scaling(0.1, 5.0)
            .initial(vec![2.0]);
        let (lo, hi) = p.scaled_bounds();
        assert!((lo[0] - 0.5).abs() < 1e-12 && (hi[0] - 1.5).abs() < 1e-12);

        let mut values = g.registry().initial_values();
        let x = p.scaled_start(&values);
        assert!((x[0] - 0.7).abs() < 1e-12);
        p.apply(&x, &mut values);
        let h = values.get(g.var(g.resolve("geom.h").unwrap()))[0];
        assert!((h - 2.0).abs() < 1e-12);
    }

    #[test]
    fn violation_measures_distance_to_feasible_set() {
        assert_eq!(ConstraintBound::Upper(1.0).violation(3.0), 2.0);
        assert_eq!(ConstraintBound::Upper(1.0).violation(-3.0), 0.0);
        assert_eq!(ConstraintBound::Lower(1.0).violation(0.5), 0.5);
        let r = ConstraintBound::Range {
            lower: 0.0,
            upper: 1.0,
        };
        assert_eq!(r.violation(0.5), 0.0);
        assert_eq!(r.violation(-2.0), 2.0);
        assert_eq!(ConstraintBound::Equals(2.0).violation(1.0), 1.0);
    }
}
