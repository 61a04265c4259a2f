//! End-to-end runs of the workflow engine built entirely from stubs.
//!
//! Each test assembles an engine with deterministic backends and checks the
//! routing, loop bounds, fault isolation and cancellation behavior through the
//! returned state and step trail.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tradegraph_agents::analyst::AnalystStage;
use tradegraph_agents::test_support::{
    fast_limits, stub_engine, tick1_state, CancelOnInvoke, FailingBackend, ScriptedBackend,
    StubTool, ToolHungryBackend,
};
use tradegraph_agents::{AnalystSelection, EngineBuilder, MemoryBank, ToolRegistry, WorkflowLimits};
use tradegraph_models::request::{RunStatus, StepOutcome, StepRecord};
use tradegraph_models::stage::{DebateSide, Domain, RiskPosture, StageId};
use tradegraph_models::store_schema::MemoryRow;
use tradegraph_store::SqliteMemory;

fn count(steps: &[StepRecord], pred: impl Fn(StageId) -> bool) -> usize {
    steps.iter().filter(|s| pred(s.stage)).count()
}

fn is_advocate(id: StageId) -> bool {
    matches!(id, StageId::Advocate(_))
}

fn all_analysts() -> AnalystSelection {
    AnalystSelection::Sequential(Domain::ALL.to_vec())
}

#[tokio::test]
async fn advocates_run_exactly_twice_max_rounds() {
    for max_rounds in 0..=4u32 {
        let limits = WorkflowLimits {
            max_debate_rounds: max_rounds,
            ..fast_limits()
        };
        let engine = stub_engine(limits, AnalystSelection::Unified, "I want to keep arguing");
        let outcome = engine.run(tick1_state(), &CancellationToken::new()).await;

        assert_eq!(outcome.status, RunStatus::Completed, "max_rounds={max_rounds}");
        assert_eq!(
            count(&outcome.steps, is_advocate),
            2 * max_rounds as usize,
            "max_rounds={max_rounds}"
        );
        assert_eq!(outcome.state.debate().round_count, 2 * max_rounds);
        assert_eq!(count(&outcome.steps, |s| s == StageId::ResearchJudge), 1);

        // strict alternation, bull first
        let sides: Vec<StageId> = outcome
            .steps
            .iter()
            .map(|s| s.stage)
            .filter(|&s| is_advocate(s))
            .collect();
        for (i, side) in sides.iter().enumerate() {
            let expected = if i % 2 == 0 {
                DebateSide::Bull
            } else {
                DebateSide::Bear
            };
            assert_eq!(*side, StageId::Advocate(expected));
        }
    }
}

#[tokio::test]
async fn risk_panel_runs_three_turns_per_cycle() {
    for max_cycles in 0..=3u32 {
        let limits = WorkflowLimits {
            max_risk_cycles: max_cycles,
            ..fast_limits()
        };
        let engine = stub_engine(limits, AnalystSelection::Unified, "ok");
        let outcome = engine.run(tick1_state(), &CancellationToken::new()).await;

        let turns: Vec<StageId> = outcome
            .steps
            .iter()
            .map(|s| s.stage)
            .filter(|s| matches!(s, StageId::RiskAdvocate(_)))
            .collect();
        assert_eq!(turns.len(), 3 * max_cycles as usize);
        for (i, turn) in turns.iter().enumerate() {
            assert_eq!(*turn, StageId::RiskAdvocate(RiskPosture::ORDER[i % 3]));
        }
        assert_eq!(outcome.state.risk().cycles(), max_cycles);
        assert_eq!(outcome.state.final_decision(), Some("ok"));
    }
}

#[tokio::test]
async fn tool_hungry_analyst_stops_at_the_cap() {
    for max_tool_calls in 0..=4u32 {
        let tool = StubTool::new("get_market_data", "close=101.5");
        let tool_calls = tool.call_counter();
        let mut tools = ToolRegistry::new();
        tools.register(Domain::Market, Arc::new(tool));

        let limits = WorkflowLimits {
            max_tool_calls,
            ..fast_limits()
        };
        let engine = EngineBuilder::new(limits)
            .quick_backend(Arc::new(ToolHungryBackend::new("get_market_data")))
            .deep_backend(Arc::new(ScriptedBackend::fixed("ok")))
            .tools(tools)
            .build(&AnalystSelection::Sequential(vec![Domain::Market]))
            .unwrap();
        let outcome = engine.run(tick1_state(), &CancellationToken::new()).await;
        let state = &outcome.state;

        assert_eq!(state.tool_call_counts().get(Domain::Market), max_tool_calls);
        assert_eq!(tool_calls.load(Ordering::SeqCst), max_tool_calls as usize);
        assert_eq!(
            count(&outcome.steps, |s| s == StageId::ToolCalls(Domain::Market)),
            max_tool_calls as usize
        );
        assert_eq!(
            count(&outcome.steps, |s| s == StageId::Analyst(Domain::Market)),
            max_tool_calls as usize + 1
        );

        let report = state.reports().get(Domain::Market).unwrap();
        assert!(!report.trim().is_empty());

        // the pruner left one summarizing turn and no tool rounds
        let market_turns: Vec<_> = state
            .messages()
            .iter()
            .filter(|m| m.stage.and_then(StageId::domain) == Some(Domain::Market))
            .collect();
        assert_eq!(market_turns.len(), 1);
        assert_eq!(market_turns[0].content, report);
        assert_eq!(outcome.status, RunStatus::Completed);
    }
}

#[tokio::test]
async fn identical_runs_route_identically() {
    let engine = stub_engine(fast_limits(), all_analysts(), "ok");
    let first = engine.run(tick1_state(), &CancellationToken::new()).await;
    let second = engine.run(tick1_state(), &CancellationToken::new()).await;

    assert_eq!(first.state.final_decision(), second.state.final_decision());
    assert_eq!(
        first.state.debate().round_count,
        second.state.debate().round_count
    );
    assert_eq!(first.state.risk().round_count, second.state.risk().round_count);
    let stages = |o: &tradegraph_agents::RunOutcome| -> Vec<StageId> {
        o.steps.iter().map(|s| s.stage).collect()
    };
    assert_eq!(stages(&first), stages(&second));
}

#[tokio::test]
async fn failing_analyst_does_not_stop_the_run() {
    let engine = EngineBuilder::new(fast_limits())
        .backend(Arc::new(ScriptedBackend::fixed("ok")))
        .stage(Arc::new(AnalystStage::new(
            Domain::News,
            Arc::new(FailingBackend),
            Arc::new(ToolRegistry::new()),
            3,
        )))
        .build(&all_analysts())
        .unwrap();
    let outcome = engine.run(tick1_state(), &CancellationToken::new()).await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.state.final_decision(), Some("ok"));
    assert_eq!(outcome.state.reports().populated_count(), 4);
    assert_eq!(
        outcome.state.reports().get(Domain::News),
        Some("stage failed: Backend error: backend unavailable")
    );
    let failed: Vec<_> = outcome
        .steps
        .iter()
        .filter(|s| matches!(s.outcome, StepOutcome::Failed { .. }))
        .map(|s| s.stage)
        .collect();
    assert_eq!(failed, vec![StageId::Analyst(Domain::News)]);
}

#[tokio::test]
async fn tick1_scenario() {
    let limits = WorkflowLimits {
        max_debate_rounds: 1,
        max_tool_calls: 1,
        ..fast_limits()
    };
    let engine = stub_engine(limits, all_analysts(), "ok");
    let outcome = engine.run(tick1_state(), &CancellationToken::new()).await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(count(&outcome.steps, is_advocate), 2);
    assert_eq!(count(&outcome.steps, |s| s == StageId::ResearchJudge), 1);
    assert_eq!(outcome.state.risk().cycles(), fast_limits().max_risk_cycles);
    assert_eq!(outcome.state.final_decision(), Some("ok"));
    assert_eq!(outcome.state.investment_plan(), Some("ok"));
    assert_eq!(outcome.state.trader_plan(), Some("ok"));
    assert!(outcome.error.is_none());

    // four analysts, four prunes, two advocates, judge, trader, three risk turns, risk judge
    assert_eq!(outcome.steps.len(), 4 + 4 + 2 + 1 + 1 + 3 + 1);
    assert!(outcome
        .steps
        .iter()
        .all(|s| s.outcome == StepOutcome::Completed));
}

#[tokio::test]
async fn cancellation_after_first_analyst() {
    let cancel = CancellationToken::new();
    let first_analyst = AnalystStage::new(
        Domain::Market,
        Arc::new(CancelOnInvoke::new(
            Arc::new(ScriptedBackend::fixed("ok")),
            cancel.clone(),
        )),
        Arc::new(ToolRegistry::new()),
        3,
    );
    let engine = EngineBuilder::new(fast_limits())
        .backend(Arc::new(ScriptedBackend::fixed("ok")))
        .stage(Arc::new(first_analyst))
        .build(&all_analysts())
        .unwrap();
    let outcome = engine.run(tick1_state(), &cancel).await;

    assert_eq!(outcome.status, RunStatus::Cancelled);
    assert_eq!(outcome.state.reports().populated_count(), 1);
    assert_eq!(outcome.state.reports().get(Domain::Market), Some("ok"));
    assert!(outcome.state.final_decision().is_none());
    assert_eq!(outcome.steps.len(), 1);

    let response = outcome.into_response(uuid::Uuid::new_v4(), chrono::Utc::now(), 1);
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["status"], "cancelled");
    assert!(json.get("final_decision").is_none());
    assert_eq!(json["error"], "cancelled before market prune");
}

#[tokio::test]
async fn unified_mode_fetches_every_domain() {
    let mut tools = ToolRegistry::new();
    let mut counters = Vec::new();
    for domain in Domain::ALL {
        let tool = StubTool::new(&format!("get_{domain}"), &format!("{domain} rows"));
        counters.push(tool.call_counter());
        tools.register(domain, Arc::new(tool));
    }
    let backend = Arc::new(ScriptedBackend::fixed(
        r#"{"market": "m", "fundamentals": "f", "news": "n", "sentiment": "s"}"#,
    ));
    let engine = EngineBuilder::new(fast_limits())
        .backend(backend)
        .tools(tools)
        .build(&AnalystSelection::Unified)
        .unwrap();
    let outcome = engine.run(tick1_state(), &CancellationToken::new()).await;

    let reports = outcome.state.reports();
    assert_eq!(reports.get(Domain::Market), Some("m"));
    assert_eq!(reports.get(Domain::Sentiment), Some("s"));
    assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 1));
    assert_eq!(
        count(&outcome.steps, |s| s.domain().is_some()),
        0,
        "unified mode skips the sequential chain"
    );
    assert_eq!(outcome.status, RunStatus::Completed);
}

#[tokio::test]
async fn memory_precedent_reaches_the_advocates() {
    let store = SqliteMemory::open_in_memory().unwrap();
    store
        .insert(&MemoryRow {
            role: "bull".to_string(),
            situation: "ok earnings beat".to_string(),
            recommendation: "Do not chase gaps after earnings".to_string(),
        })
        .unwrap();

    let backend = Arc::new(ScriptedBackend::fixed("ok"));
    let engine = EngineBuilder::new(fast_limits())
        .backend(backend.clone())
        .memory(MemoryBank::from_store(Arc::new(store)))
        .build(&AnalystSelection::Unified)
        .unwrap();
    engine.run(tick1_state(), &CancellationToken::new()).await;

    let prompts = backend.system_prompts();
    let with_precedent: Vec<_> = prompts
        .iter()
        .filter(|p| p.contains("Do not chase gaps after earnings"))
        .collect();
    assert_eq!(with_precedent.len(), 1);
    assert!(with_precedent[0].contains("Bull Analyst advocating"));
}

#[tokio::test]
async fn long_debates_still_reach_a_decision() {
    let limits = WorkflowLimits {
        max_debate_rounds: 130,
        ..fast_limits()
    };
    let engine = stub_engine(limits, AnalystSelection::Unified, "ok");
    let outcome = engine.run(tick1_state(), &CancellationToken::new()).await;

    assert_eq!(outcome.status, RunStatus::Completed, "{:?}", outcome.error);
    assert_eq!(outcome.state.debate().round_count, 260);
    assert_eq!(count(&outcome.steps, is_advocate), 260);
    assert_eq!(outcome.state.final_decision(), Some("ok"));
}

#[tokio::test]
async fn large_tool_cap_across_all_analysts_reaches_a_decision() {
    let max_tool_calls = 32;
    let mut tools = ToolRegistry::new();
    for domain in Domain::ALL {
        tools.register(domain, Arc::new(StubTool::new("get_data", "rows=3")));
    }
    let backend = Arc::new(ToolHungryBackend::new("get_data"));

    let limits = WorkflowLimits {
        max_tool_calls,
        ..fast_limits()
    };
    let engine = EngineBuilder::new(limits)
        .quick_backend(backend.clone())
        .deep_backend(Arc::new(ScriptedBackend::fixed("ok")))
        .tools(tools)
        .build(&all_analysts())
        .unwrap();
    let outcome = engine.run(tick1_state(), &CancellationToken::new()).await;

    assert_eq!(outcome.status, RunStatus::Completed, "{:?}", outcome.error);
    assert_eq!(outcome.state.reports().populated_count(), 4);
    for domain in Domain::ALL {
        assert_eq!(outcome.state.tool_call_counts().get(domain), max_tool_calls);
    }
    assert_eq!(outcome.state.final_decision(), Some("ok"));

    // 33 analyst calls per domain, two advocates, the trader and three risk turns
    assert_eq!(backend.calls(), 4 * 33 + 2 + 1 + 3);
    assert_eq!(outcome.steps.len() as u64, engine.step_budget());
}
