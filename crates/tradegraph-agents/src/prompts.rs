use tradegraph_models::market::Market;
use tradegraph_models::stage::{DebateSide, Domain, RiskPosture};
use tradegraph_models::state::{Reports, SharedState};

fn domain_focus(domain: Domain) -> &'static str {
    match domain {
        Domain::Market => {
            "Focus on price action and technical indicators: trend (50/200-day moving \
             averages), momentum (MACD, RSI), volatility (Bollinger Bands, ATR) and volume. \
             Pick the indicators that complement each other rather than repeat each other."
        }
        Domain::Sentiment => {
            "Focus on social media and public sentiment over the past week: what people are \
             saying about the company, how sentiment shifted day by day, and what that implies \
             for traders."
        }
        Domain::News => {
            "Focus on news and macroeconomic developments over the past week that are relevant \
             for trading: company announcements, sector news, central bank and policy events."
        }
        Domain::Fundamentals => {
            "Focus on fundamentals: financial statements, profitability, balance-sheet health, \
             valuation, insider sentiment and insider transactions."
        }
    }
}

fn market_context(ticker: &str) -> String {
    let market = Market::classify(ticker);
    format!(
        "Instrument {ticker} trades on the {} market. Quote all prices in {} ({}).",
        market.name(),
        market.currency_name(),
        market.currency_symbol()
    )
}

/// All domain reports under headings, for advocates, judges and the trader.
pub fn format_reports(reports: &Reports) -> String {
    Domain::ALL
        .iter()
        .map(|&d| {
            format!(
                "### {} report\n{}",
                d,
                reports.get(d).unwrap_or("(not produced this run)")
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn analyst_system_prompt(domain: Domain, state: &SharedState) -> String {
    format!(
        "You are the {domain} analyst on a trading research team.\n\n\
         ## CONTEXT\n\n\
         {}\n\
         Analysis date: {}.\n\n\
         ## TASK\n\n\
         {}\n\n\
         ## OUTPUT\n\n\
         Write a detailed, nuanced report. Do not simply state that trends are mixed; explain \
         what the data shows and why it matters. If some data could not be retrieved, say so \
         explicitly and work with what you have. End with a Markdown table summarizing the key \
         points.",
        market_context(state.instrument_id()),
        state.as_of_date(),
        domain_focus(domain),
    )
}

/// Appended after tool results so the backend writes the report.
pub fn tool_followup_prompt() -> &'static str {
    "The tool results above answer your data requests. Request more data only if it is \
     essential; otherwise write your final report now."
}

pub fn tool_budget_exhausted_prompt(max_tool_calls: u32) -> String {
    format!(
        "You have used all {max_tool_calls} data requests allowed for this analysis. No further \
         tools are available. Write your final report now from the information above, noting \
         any data you could not obtain."
    )
}

pub fn unified_summary_prompt(domain: Domain, ticker: &str) -> String {
    format!(
        "You condense raw {domain} data for {ticker} into a compact brief for an analyst.\n\n\
         ## RULES\n\n\
         - Keep every number that matters for a trading decision.\n\
         - Drop boilerplate, repeated rows and formatting.\n\
         - Stay under 800 words.\n\
         - Do not add opinions or recommendations."
    )
}

pub fn unified_analysis_prompt(state: &SharedState) -> String {
    format!(
        "You are a single analyst covering every research domain for {ticker}.\n\n\
         ## CONTEXT\n\n\
         {context}\n\
         Analysis date: {date}.\n\n\
         ## TASK\n\n\
         The user turn contains market, fundamentals, news and sentiment data. Write one \
         report per domain.\n\n\
         ## OUTPUT FORMAT\n\n\
         Reply with ONLY a JSON object with exactly these string fields:\n\
         {{\"market\": \"...\", \"fundamentals\": \"...\", \"news\": \"...\", \"sentiment\": \"...\"}}\n\
         If a domain has no data, say so in its field.",
        ticker = state.instrument_id(),
        context = market_context(state.instrument_id()),
        date = state.as_of_date(),
    )
}

pub fn advocate_prompt(side: DebateSide, state: &SharedState, past: &str) -> String {
    let debate = state.debate();
    let (stance, task) = match side {
        DebateSide::Bull => (
            "You are the Bull Analyst advocating for investing in the stock.",
            "Build an evidence-based case emphasizing growth potential, competitive \
             advantages and positive market indicators.",
        ),
        DebateSide::Bear => (
            "You are the Bear Analyst making the case against investing in the stock.",
            "Present a well-reasoned argument emphasizing risks, competitive weaknesses and \
             negative indicators.",
        ),
    };
    let last = if debate.current_response.is_empty() {
        "(none yet, you open the debate)"
    } else {
        debate.current_response.as_str()
    };
    format!(
        "{stance} {task}\n\n\
         Engage directly with the {opponent}'s last argument and refute it with specific data. \
         Speak conversationally, as in a live debate, without special formatting.\n\n\
         ## RESEARCH REPORTS\n\n\
         {reports}\n\n\
         ## DEBATE SO FAR\n\n\
         {history}\n\n\
         ## LAST ARGUMENT FROM THE {opponent_upper}\n\n\
         {last}\n\n\
         ## LESSONS FROM SIMILAR SITUATIONS\n\n\
         {past}",
        opponent = side.opponent().label(),
        opponent_upper = side.opponent().label().to_uppercase(),
        reports = format_reports(state.reports()),
        history = or_none(&debate.history),
    )
}

pub fn research_judge_prompt(state: &SharedState, past: &str) -> String {
    format!(
        "You are the research manager and debate facilitator. Evaluate the debate between \
         the Bull and Bear analysts and make a definitive decision: Buy, Sell, or Hold. Choose \
         Hold only if it is strongly justified by the arguments, not as a fallback.\n\n\
         ## OUTPUT\n\n\
         State your recommendation, the strongest arguments behind it, and an investment plan \
         for the trader: strategic actions, position direction and key risks to monitor.\n\n\
         ## RESEARCH REPORTS\n\n\
         {reports}\n\n\
         ## DEBATE TRANSCRIPT\n\n\
         {history}\n\n\
         ## LESSONS FROM SIMILAR SITUATIONS\n\n\
         {past}",
        reports = format_reports(state.reports()),
        history = or_none(&state.debate().history),
    )
}

pub fn trader_prompt(state: &SharedState, past: &str) -> String {
    let market = Market::classify(state.instrument_id());
    format!(
        "You are a trader turning the research team's investment plan for {ticker} into a \
         concrete trading proposal.\n\n\
         ## RULES\n\n\
         - Give a target price in {currency} ({symbol}).\n\
         - Give entry, sizing and exit guidance.\n\
         - End with exactly one line: FINAL TRANSACTION PROPOSAL: **BUY/HOLD/SELL**\n\n\
         ## INVESTMENT PLAN\n\n\
         {plan}\n\n\
         ## RESEARCH REPORTS\n\n\
         {reports}\n\n\
         ## LESSONS FROM SIMILAR SITUATIONS\n\n\
         {past}",
        ticker = state.instrument_id(),
        currency = market.currency_name(),
        symbol = market.currency_symbol(),
        plan = state.investment_plan().unwrap_or("(no investment plan was produced)"),
        reports = format_reports(state.reports()),
    )
}

pub fn risk_advocate_prompt(posture: RiskPosture, state: &SharedState) -> String {
    let risk = state.risk();
    let stance = match posture {
        RiskPosture::Aggressive => {
            "You are the Risky Risk Analyst. Champion high-reward, high-risk opportunities and \
             argue for bold strategies where the upside justifies the exposure."
        }
        RiskPosture::Conservative => {
            "You are the Safe Risk Analyst. Protect assets, minimize volatility and argue for \
             steady, low-risk adjustments to the trader's plan."
        }
        RiskPosture::Neutral => {
            "You are the Neutral Risk Analyst. Weigh both upside and downside and argue for a \
             balanced approach that challenges both the risky and the safe views."
        }
    };
    let others = RiskPosture::ORDER
        .iter()
        .filter(|&&p| p != posture)
        .map(|&p| match risk.latest_response(p) {
            "" => format!("{}: (none)", p.label()),
            latest => latest.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "{stance}\n\n\
         Respond directly to the latest points of the other analysts below, using the research \
         reports as evidence. Speak conversationally without special formatting.\n\n\
         ## TRADER'S PLAN\n\n\
         {plan}\n\n\
         ## RESEARCH REPORTS\n\n\
         {reports}\n\n\
         ## RISK DISCUSSION SO FAR\n\n\
         {history}\n\n\
         ## LATEST FROM THE OTHER ANALYSTS\n\n\
         {others}",
        plan = state.trader_plan().unwrap_or("(no trading plan was produced)"),
        reports = format_reports(state.reports()),
        history = or_none(&risk.history),
    )
}

pub fn risk_judge_prompt(state: &SharedState, past: &str) -> String {
    format!(
        "You are the risk management judge. Evaluate the debate between the Risky, Safe and \
         Neutral analysts and decide the best course of action for the trader: Buy, Sell, or \
         Hold. Choose Hold only if strongly justified.\n\n\
         ## OUTPUT\n\n\
         Summarize the strongest points of each analyst, adjust the trader's plan where the \
         debate warrants, and end with exactly one line: FINAL DECISION: **BUY/HOLD/SELL**\n\n\
         ## TRADER'S PLAN\n\n\
         {plan}\n\n\
         ## RESEARCH REPORTS\n\n\
         {reports}\n\n\
         ## RISK DEBATE TRANSCRIPT\n\n\
         {history}\n\n\
         ## LESSONS FROM SIMILAR SITUATIONS\n\n\
         {past}",
        plan = state.trader_plan().unwrap_or("(no trading plan was produced)"),
        reports = format_reports(state.reports()),
        history = or_none(&state.risk().history),
    )
}

fn or_none(text: &str) -> &str {
    if text.trim().is_empty() {
        "(none)"
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tradegraph_models::stage::StageId;
    use tradegraph_models::state::StateDelta;

    fn state(ticker: &str) -> SharedState {
        SharedState::new(ticker, NaiveDate::from_ymd_opt(2024, 5, 10).unwrap())
    }

    #[test]
    fn analyst_prompt_carries_market_classification() {
        let prompt = analyst_system_prompt(Domain::Market, &state("600519"));
        assert!(prompt.contains("China A-share"));
        assert!(prompt.contains("CNY (¥)"));
        assert!(prompt.contains("2024-05-10"));
        assert!(prompt.contains("MACD"));

        let hk = analyst_system_prompt(Domain::News, &state("0700.HK"));
        assert!(hk.contains("HKD (HK$)"));
    }

    #[test]
    fn every_domain_has_its_own_focus() {
        let s = state("AAPL");
        let prompts: Vec<String> = Domain::ALL
            .iter()
            .map(|&d| analyst_system_prompt(d, &s))
            .collect();
        for (i, a) in prompts.iter().enumerate() {
            assert!(a.contains("## TASK"));
            for b in &prompts[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn missing_reports_are_marked() {
        let mut s = state("AAPL");
        s.apply(
            StageId::Analyst(Domain::News),
            StateDelta::default().with_report(Domain::News, "Fed holds"),
        )
        .unwrap();
        let text = format_reports(s.reports());
        assert!(text.contains("### news report\nFed holds"));
        assert!(text.contains("### market report\n(not produced this run)"));
    }

    #[test]
    fn opening_advocate_is_told_it_opens() {
        let prompt = advocate_prompt(DebateSide::Bull, &state("AAPL"), "No past memories found.");
        assert!(prompt.contains("Bull Analyst advocating"));
        assert!(prompt.contains("you open the debate"));
        assert!(prompt.contains("LAST ARGUMENT FROM THE BEAR ANALYST"));
    }

    #[test]
    fn risk_advocate_sees_other_postures_only() {
        let mut s = state("AAPL");
        let risk = s.risk().with_turn(RiskPosture::Aggressive, "double the size");
        s.apply(
            StageId::RiskAdvocate(RiskPosture::Aggressive),
            StateDelta {
                risk: Some(risk),
                ..Default::default()
            },
        )
        .unwrap();

        let prompt = risk_advocate_prompt(RiskPosture::Conservative, &s);
        assert!(prompt.contains("Risky Analyst: double the size"));
        assert!(prompt.contains("Neutral Analyst: (none)"));
        assert!(!prompt.contains("Safe Analyst: (none)"));
    }

    #[test]
    fn judges_and_trader_require_decision_lines() {
        let s = state("AAPL");
        assert!(trader_prompt(&s, "").contains("FINAL TRANSACTION PROPOSAL"));
        assert!(trader_prompt(&s, "").contains("USD ($)"));
        assert!(risk_judge_prompt(&s, "").contains("FINAL DECISION"));
        assert!(research_judge_prompt(&s, "").contains("investment plan"));
    }

    #[test]
    fn unified_prompt_requests_domain_keys() {
        let prompt = unified_analysis_prompt(&state("AAPL"));
        for key in ["\"market\"", "\"fundamentals\"", "\"news\"", "\"sentiment\""] {
            assert!(prompt.contains(key), "missing {key}");
        }
        assert!(unified_summary_prompt(Domain::News, "AAPL").contains("under 800 words"));
        assert!(tool_budget_exhausted_prompt(3).contains("all 3 data requests"));
    }
}
