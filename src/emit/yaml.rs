use crate::emit::EmitError;
use crate::plan::types::CommandPlan;

/// Emit a command plan as YAML.
///
/// # Errors
///
/// Returns an error if YAML serialization fails.
pub fn emit_yaml(plan: &CommandPlan) -> Result<String, EmitError> {
    Ok(serde_yaml::to_string(plan)?)
}

/// Emit a command plan as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn emit_json(plan: &CommandPlan) -> Result<String, EmitError> {
    let mut out = serde_json::to_string_pretty(plan)?;
    out.push('\n');
    Ok(out)
}
