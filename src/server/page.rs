//! Server-rendered HTML for the document page.

use std::fmt::Write as _;

use serde_json::Value;

use crate::datasource::DataTable;
use crate::labels::Label;
use crate::protection::RightsTier;

/// Everything the form needs to render, including the user's previous selections.
#[derive(Debug, Clone, Default)]
pub struct FormView {
    pub user: String,
    pub labels: Vec<Label>,
    pub data: DataTable,
    pub csrf_token: String,
    pub selected_label: String,
    pub recipients: String,
    pub rights_tier: String,
    pub justification: String,
    pub requires_additional_info: bool,
    pub message: Option<String>,
}

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn label_options(out: &mut String, labels: &[Label], selected: &str, depth: usize) {
    for l in labels {
        let sel = if l.id == selected { " selected" } else { "" };
        let indent = "&nbsp;&nbsp;&nbsp;&nbsp;".repeat(depth);
        let _ = writeln!(
            out,
            r#"<option value="{}" data-sensitivity="{}"{}>{}{}</option>"#,
            escape(&l.id), l.sensitivity, sel, indent, escape(&l.name)
        );
        label_options(out, &l.children, selected, depth + 1);
    }
}

fn cell_text(v: Option<&Value>) -> String {
    match v {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn preview_table(out: &mut String, data: &DataTable) {
    if data.columns.is_empty() {
        out.push_str("<p class=\"empty\">No data available.</p>\n");
        return;
    }
    out.push_str("<table id=\"preview\">\n<thead><tr>");
    for c in &data.columns {
        let _ = write!(out, "<th>{}</th>", escape(c));
    }
    out.push_str("</tr></thead>\n<tbody>\n");
    for row in &data.rows {
        out.push_str("<tr>");
        for c in &data.columns {
            let _ = write!(out, "<td>{}</td>", escape(&cell_text(data.cell(row, c))));
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</tbody>\n</table>\n");
}

pub fn render_form(view: &FormView) -> String {
    let mut out = String::with_capacity(4096);
    out.push_str("<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Download labelled document</title></head>\n<body>\n");
    let _ = writeln!(out, "<p class=\"user\">Signed in as {}</p>", escape(&view.user));
    if let Some(msg) = &view.message {
        let _ = writeln!(out, "<div class=\"validation\" role=\"alert\">{}</div>", escape(msg));
    }
    let _ = writeln!(
        out,
        r#"<form method="post" action="/document/protect" data-requires-additional-info="{}">"#,
        view.requires_additional_info
    );
    let _ = writeln!(out, r#"<input type="hidden" name="csrfToken" value="{}">"#, escape(&view.csrf_token));

    out.push_str("<label for=\"labelId\">Sensitivity label</label>\n<select id=\"labelId\" name=\"labelId\">\n");
    out.push_str("<option value=\"\">Select a label</option>\n");
    label_options(&mut out, &view.labels, &view.selected_label, 0);
    out.push_str("</select>\n");

    let _ = writeln!(
        out,
        r#"<label for="recipients">Recipients (comma separated)</label><input id="recipients" name="recipients" value="{}">"#,
        escape(&view.recipients)
    );
    let current = RightsTier::parse(&view.rights_tier).unwrap_or(RightsTier::View);
    out.push_str("<label for=\"rightsTier\">Rights</label>\n<select id=\"rightsTier\" name=\"rightsTier\">\n");
    for tier in [RightsTier::View, RightsTier::Edit, RightsTier::All] {
        let sel = if tier == current { " selected" } else { "" };
        let _ = writeln!(out, r#"<option value="{0}"{1}>{0}</option>"#, tier.as_str(), sel);
    }
    out.push_str("</select>\n");

    // The justification box is always posted; it is highlighted once the engine asks for it.
    let class = if view.requires_additional_info { "required" } else { "optional" };
    let _ = writeln!(
        out,
        r#"<label for="justification">Justification</label><textarea id="justification" name="justification" class="{}">{}</textarea>"#,
        class,
        escape(&view.justification)
    );
    out.push_str("<button type=\"submit\">Download</button>\n</form>\n");
    preview_table(&mut out, &view.data);
    out.push_str("</body></html>\n");
    out
}

pub fn render_error(status: u16, message: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Error</title></head>\n<body><h1>{}</h1><p>{}</p></body></html>\n",
        status,
        escape(message)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(id: &str, children: Vec<Label>) -> Label {
        Label { id: id.into(), name: format!("<{}>", id), description: String::new(), sensitivity: 1, children }
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape(r#"<a href="x">&'"#), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }

    #[test]
    fn keeps_selections_and_nests_children() {
        let view = FormView {
            user: "alice@contoso.com".into(),
            labels: vec![label("p", vec![label("c", vec![])])],
            selected_label: "c".into(),
            recipients: "a@example.com".into(),
            rights_tier: "edit".into(),
            requires_additional_info: true,
            message: Some("Additional Info Required for the selected Label.".into()),
            ..Default::default()
        };
        let html = render_form(&view);
        assert!(html.contains(r#"data-requires-additional-info="true""#));
        assert!(html.contains(r#"<option value="c" data-sensitivity="1" selected>&nbsp;&nbsp;&nbsp;&nbsp;&lt;c&gt;</option>"#));
        assert!(html.contains(r#"value="a@example.com""#));
        assert!(html.contains(r#"<option value="Edit" selected>Edit</option>"#));
        assert!(html.contains("Additional Info Required"));
        assert!(html.contains("No data available."));
    }
}
