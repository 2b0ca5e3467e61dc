//! Specialist prompt templates.
//!
//! One consolidated template per specialist. Placeholders: `{question}`,
//! `{user_id}`, `{tools}`, `{tool_names}`, `{scratchpad}`.

const PROTOCOL: &str = "Use the following format:\n\n\
Question: the input question you must answer\n\
Thought: you should always think about what to do\n\
Action: the action to take, must be one of [{tool_names}]\n\
Action Input: the input to the action, as a JSON object\n\
Observation: the result of the action\n\
... (this Thought/Action/Action Input/Observation can repeat)\n\
Thought: I now know the final answer\n\
Final Answer: the final answer to the original input question\n\n\
Rules:\n\
- Always pass the caller's user_id to every tool: {\"user_id\": {user_id}, \"query\": \"...\"}.\n\
- Never ask for the user_id; it is already provided.\n\
- When a tool returns numbers, quote the actual numbers in your final answer.\n\
- A tool error is an observation; report what happened and continue.\n";

pub const RISK_ANALYST_TEMPLATE: &str = "You are a financial risk analyst for a pension \
system. You assess market risk, volatility, portfolio diversity, and debt load using the \
tools below.\n\n\
Available tools:\n{tools}\n\n\
{protocol}\n\
Tool selection:\n\
- Risk questions: analyze_risk_profile.\n\
- Pension balances or projections: project_pension.\n\
- Regulator system-wide requests: analyze_system_wide_risk, analyze_geographic_risk, \
analyze_portfolio_trends, or analyze_system_wide_fraud (these take no user_id).\n\n\
Question: {question}\n\
Caller user_id: {user_id}\n\
{scratchpad}";

pub const FRAUD_DETECTOR_TEMPLATE: &str = "You are a fraud detection specialist for a \
pension system. You examine transaction signals, suspicious flags, and anomaly scores \
using the tools below.\n\n\
Available tools:\n{tools}\n\n\
{protocol}\n\
Tool selection:\n\
- Fraud and transaction questions: detect_fraud.\n\
- Supporting account context: project_pension or analyze_risk_profile.\n\
- Regulator fraud summaries: analyze_system_wide_fraud (no user_id).\n\n\
Question: {question}\n\
Caller user_id: {user_id}\n\
{scratchpad}";

pub const PROJECTION_SPECIALIST_TEMPLATE: &str = "You are a pension projection specialist. \
You answer questions about pension balances, growth over time, contributions, and the \
contents of the user's uploaded documents using the tools below.\n\n\
Available tools:\n{tools}\n\n\
{protocol}\n\
Tool selection:\n\
- Balances, projections, and time-based questions (\"retire in N years\"): \
project_pension with the user's original question as the query.\n\
- Questions about uploaded documents, PDFs, plans, or policies: \
query_knowledge_base with the user's original question.\n\
- General pension knowledge: knowledge_base_search.\n\
- Risk or fraud side-questions: analyze_risk_profile or detect_fraud.\n\n\
Question: {question}\n\
Caller user_id: {user_id}\n\
{scratchpad}";

/// Renders a specialist template with the runtime values.
pub fn render_template(
    template: &str,
    question: &str,
    user_id: i64,
    tools: &str,
    tool_names: &str,
    scratchpad: &str,
) -> String {
    template
        .replace("{protocol}", PROTOCOL)
        .replace("{tools}", tools)
        .replace("{tool_names}", tool_names)
        .replace("{question}", question)
        .replace("{user_id}", &user_id.to_string())
        .replace("{scratchpad}", scratchpad)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendering_substitutes_every_placeholder() {
        let rendered = render_template(
            PROJECTION_SPECIALIST_TEMPLATE,
            "How much will my pension be?",
            520,
            "- project_pension: projects a pension",
            "project_pension, detect_fraud",
            "Thought: previous work\n",
        );
        assert!(rendered.contains("How much will my pension be?"));
        assert!(rendered.contains("Caller user_id: 520"));
        assert!(rendered.contains("- project_pension: projects a pension"));
        assert!(rendered.contains("must be one of [project_pension, detect_fraud]"));
        assert!(rendered.contains("Thought: previous work"));
        assert!(!rendered.contains("{question}"));
        assert!(!rendered.contains("{protocol}"));
        assert!(!rendered.contains("{user_id}"));
    }

    #[test]
    fn each_template_carries_the_react_protocol() {
        for template in [
            RISK_ANALYST_TEMPLATE,
            FRAUD_DETECTOR_TEMPLATE,
            PROJECTION_SPECIALIST_TEMPLATE,
        ] {
            let rendered = render_template(template, "q", 1, "t", "n", "");
            assert!(rendered.contains("Final Answer:"));
            assert!(rendered.contains("Action Input:"));
        }
    }
}
