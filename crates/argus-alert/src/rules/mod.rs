pub mod change;
pub mod threshold;

/// Substitute `${name}` placeholders in a message template.
pub(crate) fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("${{{name}}}"), value);
    }
    out
}
