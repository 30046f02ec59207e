#![allow(dead_code)]

use std::sync::Arc;

use vectorfarm::config::PipelineConfig;
use vectorfarm::dag::Scheduler;
use vectorfarm::engine::{CoreRuntime, RuntimeOptions};
use vectorfarm::model::{NamePath, Version};
use vectorfarm::storage::{InMemoryStorage, Storage};
use vectorfarm::types::{NodeId, NodeKind};
use vectorfarm_test_utils::builders::{ComponentBuilder, PipelineBuilder};

pub use vectorfarm_test_utils::{init_tracing, with_timeout};

pub const TARGET: &str = "HD209458b";

/// `t1.fit -> t2.fit -> t3.fit`, each producing `result.depth`.
pub fn chain_pipeline() -> PipelineConfig {
    PipelineBuilder::new()
        .task("t1", ComponentBuilder::new("fit").output("result", "depth"))
        .task(
            "t2",
            ComponentBuilder::new("fit")
                .depends("t1.fit")
                .output("result", "depth"),
        )
        .task(
            "t3",
            ComponentBuilder::new("fit")
                .depends("t2.fit.result")
                .output("result", "depth"),
        )
        .build()
}

pub fn task_node(factory: &str) -> NodeId {
    NodeId::new(NodeKind::Task, factory, "fit")
}

/// Mark `factory.fit` as already computed at `1.0.0` for `run_id`/`target`.
pub fn persist_node(storage: &InMemoryStorage, run_id: u64, target: &str, factory: &str) {
    storage
        .put(
            target,
            &NamePath::node(run_id, &task_node(factory)),
            Version::new(1, 0, 0),
            b"{}",
        )
        .unwrap();
}

pub fn core_for(cfg: &PipelineConfig, storage: Arc<InMemoryStorage>, pool_size: usize) -> CoreRuntime {
    CoreRuntime::new(
        Scheduler::new(Arc::clone(&cfg.graph), 1),
        storage,
        cfg.revision.clone(),
        cfg.config.resubmit_behaviour,
        cfg.config.queue_length,
        RuntimeOptions {
            exit_when_idle: true,
            pool_size,
        },
    )
}
