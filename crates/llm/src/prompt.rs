//! Prompt assembly: placeholder substitution, evidence blocks, few-shot
//! examples, and the output-schema hint.
//!
//! Evidence and examples are rendered as XML blocks with escaped content so
//! page text can never break out of its document wrapper.

use std::collections::BTreeMap;

use rowboat_shared::{Evidence, FieldType, OutputSchema, PromptExample, Row};

/// Substitute `{{column}}` placeholders with the row's values.
/// Unknown placeholders are left as-is.
pub fn render_template(template: &str, row: &Row) -> String {
    let mut out = template.to_string();
    for (name, value) in &row.fields {
        out = out.replace(&format!("{{{{{name}}}}}"), value);
    }
    out
}

/// Escape text for embedding inside an XML element.
pub fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Render gathered evidence as a `<documents>` block.
pub fn format_docs(evidence: &Evidence) -> String {
    let mut out = String::from("<documents>\n");
    for (i, doc) in evidence.docs.iter().enumerate() {
        out.push_str(&format!("<document index=\"{}\">\n", i + 1));
        out.push_str(&format!("<source>{}</source>\n", xml_escape(&doc.url)));
        out.push_str(&format!("<title>{}</title>\n", xml_escape(&doc.title)));
        let body = doc.text.as_deref().unwrap_or(&doc.snippet);
        out.push_str(&format!("<content>{}</content>\n", xml_escape(body)));
        out.push_str("</document>\n");
    }
    out.push_str("</documents>");
    out
}

/// Render few-shot examples as an `<examples>` block, with each ideal
/// output as a JSON object.
pub fn format_examples(examples: &[PromptExample]) -> String {
    let mut out = String::from("<examples>\n");
    for example in examples {
        out.push_str("<example>\n");
        out.push_str(&format!("<input>{}</input>\n", xml_escape(&example.input)));
        let ideal = serde_json::to_string(&example.output).unwrap_or_default();
        out.push_str(&format!("<ideal_output>{}</ideal_output>\n", xml_escape(&ideal)));
        out.push_str("</example>\n");
    }
    out.push_str("</examples>");
    out
}

/// Describe the required output shape to the model.
pub fn schema_hint(schema: &OutputSchema) -> String {
    let mut out = String::from(
        "Respond with a single JSON object and nothing else. Fields:\n",
    );
    for field in &schema.fields {
        let requirement = if field.required { "required" } else { "optional" };
        let type_desc = match field.kind {
            FieldType::Enum => format!("one of [{}]", field.options.join(", ")),
            other => other.as_str().to_string(),
        };
        out.push_str(&format!("- \"{}\" ({type_desc}, {requirement})", field.name));
        if let Some(desc) = &field.description {
            out.push_str(&format!(": {desc}"));
        }
        out.push('\n');
    }
    out
}

/// Assemble the full user prompt for one row.
///
/// Order: evidence documents, few-shot examples, the rendered user
/// template, then the schema hint.
pub fn build_user_prompt(
    template: &str,
    row: &Row,
    evidence: &Evidence,
    examples: &[PromptExample],
    schema: &OutputSchema,
) -> String {
    let mut sections: Vec<String> = Vec::new();
    if !evidence.is_empty() {
        sections.push(format_docs(evidence));
    }
    if !examples.is_empty() {
        sections.push(format_examples(examples));
    }
    sections.push(render_template(template, row));
    sections.push(schema_hint(schema));
    sections.join("\n\n")
}

/// Re-prompt after a validation failure: the previous output plus the
/// problems found, asking for a corrected object.
pub fn build_reprompt(original_user: &str, previous_output: &str, problems: &str) -> String {
    format!(
        "{original_user}\n\nYour previous response was:\n{previous_output}\n\n\
         It failed validation: {problems}\n\
         Respond again with a corrected JSON object and nothing else."
    )
}
