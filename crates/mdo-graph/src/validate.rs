//! Connection validation logic.

use mdo_core::{Conversion, VarId, VarKind, VarRegistry};
use tracing::warn;

use crate::error::{GraphError, GraphResult};
use crate::graph::Connection;

/// Resolve and check one `src -> dst` connection.
///
/// Source must be an output and destination an input, shapes must be
/// identical, and units compatible. A side without a unit connects to
/// anything.
pub(crate) fn validate_connection(
    registry: &VarRegistry,
    src: &str,
    dst: &str,
) -> GraphResult<Connection> {
    let src_id = registry
        .resolve(src)
        .map_err(|_| GraphError::connection(src, dst, format!("'{src}' does not exist")))?;
    let dst_id = registry
        .resolve(dst)
        .map_err(|_| GraphError::connection(src, dst, format!("'{dst}' does not exist")))?;

    let s = registry.var(src_id);
    let d = registry.var(dst_id);

    if s.kind() != VarKind::Output {
        return Err(GraphError::connection(src, dst, "source is not an output"));
    }
    if d.kind() != VarKind::Input {
        return Err(GraphError::connection(src, dst, "destination is not an input"));
    }
    if !s.meta.shape.is_compatible(&d.meta.shape) {
        return Err(GraphError::connection(
            src,
            dst,
            format!("shape {} does not match {}", s.meta.shape, d.meta.shape),
        ));
    }

    let conv = match (&s.unit, &d.unit) {
        (Some(su), Some(du)) => su.conversion_to(du).ok_or_else(|| {
            GraphError::connection(
                src,
                dst,
                format!(
                    "units '{su}' ({}) and '{du}' ({}) are incompatible",
                    su.dimension(),
                    du.dimension()
                ),
            )
        })?,
        (Some(u), None) | (None, Some(u)) if !u.is_dimensionless() => {
            warn!(src, dst, unit = %u, "connecting a variable with units to one without");
            Conversion::IDENTITY
        }
        _ => Conversion::IDENTITY,
    };

    Ok(Connection {
        src: src_id,
        dst: dst_id,
        conv,
    })
}

/// Reject destinations with more than one source. Returns the per-variable
/// source index.
pub(crate) fn validate_single_source(
    registry: &VarRegistry,
    connections: &[Connection],
) -> GraphResult<Vec<Option<usize>>> {
    let mut source_of: Vec<Option<usize>> = vec![None; registry.vars().len()];
    for (i, c) in connections.iter().enumerate() {
        let slot = &mut source_of[c.dst.idx()];
        if let Some(prev) = *slot {
            let prev_src = &registry.var(connections[prev].src).path;
            return Err(GraphError::connection(
                &registry.var(c.src).path,
                &registry.var(c.dst).path,
                format!("destination is already connected to '{prev_src}'"),
            ));
        }
        *slot = Some(i);
    }
    Ok(source_of)
}

/// Per variable, the connections leaving it.
pub(crate) fn fan_out(registry: &VarRegistry, connections: &[Connection]) -> Vec<Vec<usize>> {
    let mut targets: Vec<Vec<usize>> = vec![Vec::new(); registry.vars().len()];
    for (i, c) in connections.iter().enumerate() {
        targets[c.src.idx()].push(i);
    }
    targets
}

pub(crate) fn var_owner(registry: &VarRegistry, var: VarId) -> mdo_core::CompId {
    registry.var(var).comp
}
