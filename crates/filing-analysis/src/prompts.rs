//! Task instruction templates
//!
//! Instructions are `minijinja` templates rendered against each task's input
//! data. Besides the built-in filters, templates can use `money`, which
//! formats a dollar amount compactly ("$133.7B").

use minijinja::Environment;
use serde::Serialize;

pub const STATEMENT_ANALYSIS: &str = r"Analyze the {{ statement_title }} of {{ company }} from its {{ filing_type }} filed {{ filing_date }}.
The statement has {{ line_items }} line items covering {{ current_period }} and {{ prior_period }}.
{% if incomplete %}
The statement is incomplete ({{ line_items }} line items); say which conclusions this limits.
{% endif %}
{% if warnings %}
Validation raised these warnings:
{% for warning in warnings %}
- {{ warning }}
{% endfor %}
{% endif %}
Cite line items by their exact labels and compare the two periods.";

pub const RATIO_COMMENTARY: &str = r#"Comment on the financial ratios of {{ company }}.
{{ applicable }} of {{ total }} ratios could be computed.
{% for ratio in ratios %}
- {{ ratio.name }} ({{ ratio.category }}): {{ ratio.value | round(2) if ratio.value is not none else "n/a" }}, {{ ratio.interpretation if ratio.value is not none else ratio.reason }}
{% endfor %}
Explain what the healthy and weak readings mean together."#;

pub const COMPANY_PROFILE: &str = r#"Write a company profile of {{ company }}.
{% if filings %}
Recent regulatory filings:
{% for filing in filings %}
- {{ filing.form_type }} filed {{ filing.filing_date }}{{ " for the period ended " ~ filing.report_date if filing.report_date }}
{% endfor %}
{% endif %}
{% if snippets %}
Recent context:
{% for snippet in snippets %}
- {{ snippet.title }} ({{ snippet.source }}): {{ snippet.summary }}
{% endfor %}
{% endif %}
{% if not filings and not snippets %}
No external context is available; rely on what is generally known and say so.
{% endif %}
Describe the business, its segments and its competitive position."#;

pub const RISK_FACTORS: &str = r"Identify the principal risk factors facing {{ company }}.
{% if snippets %}
Consider this recent context:
{% for snippet in snippets %}
- {{ snippet.title }}: {{ snippet.summary }}
{% endfor %}
{% endif %}
Rank the risks by likely impact and name the filing sections that would disclose them.";

pub const SYNTHESIS: &str = r"Write the final research summary for {{ company }} ({{ query }}).
Total assets: {{ total_assets | money }}. Revenue: {{ revenue | money }}. Net income: {{ net_income | money }}.
Validation status: {{ validation_status }}.
{% for section in sections %}
## {{ section.title }}
{{ section.summary }}
{% endfor %}
{% if missing %}
These sections are unavailable and must be named as gaps: {{ missing | join(', ') }}.
{% endif %}
Combine the sections into one assessment without introducing figures that are not above.";

/// Render a template against serializable data
pub fn render<S: Serialize>(template: &str, data: &S) -> Result<String, minijinja::Error> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.add_filter("money", money);

    let rendered = env.render_str(template, minijinja::Value::from_serialize(data))?;
    Ok(rendered.trim().to_string())
}

/// Compact dollar formatting; missing values render as "n/a"
fn money(value: Option<f64>) -> String {
    let Some(value) = value else {
        return "n/a".to_string();
    };
    let sign = if value < 0.0 { "-" } else { "" };
    let abs = value.abs();
    let (scaled, suffix) = if abs >= 1e12 {
        (abs / 1e12, "T")
    } else if abs >= 1e9 {
        (abs / 1e9, "B")
    } else if abs >= 1e6 {
        (abs / 1e6, "M")
    } else if abs >= 1e3 {
        (abs / 1e3, "K")
    } else {
        return format!("{sign}${abs:.0}");
    };
    format!("{sign}${scaled:.1}{suffix}")
}
