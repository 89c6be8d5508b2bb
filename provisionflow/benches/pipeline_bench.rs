//! Benchmarks for pipeline execution.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use provisionflow::prelude::*;

fn noop_pipeline(stages: usize) -> Pipeline {
    (0..stages)
        .try_fold(PipelineBuilder::new("bench"), |builder, i| {
            builder.stage(FnStage::new(format!("stage-{i}"), format!("kind-{i}"), |_| async {
                StageOutcome::success(ResourceHandle::with_id("noop"))
            }))
        })
        .and_then(PipelineBuilder::build)
        .expect("benchmark pipeline is valid")
}

fn pipeline_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime");
    let tenant = TenantIdentity::new("bench").expect("valid tenant");
    let orchestrator = Orchestrator::default();

    for stages in [1, 8] {
        let pipeline = noop_pipeline(stages);
        c.bench_function(&format!("noop_run_{stages}_stages"), |b| {
            b.iter(|| {
                let report = runtime.block_on(orchestrator.run(tenant.clone(), &pipeline));
                black_box(report.status)
            });
        });
    }

    let ctx_pipeline = noop_pipeline(8);
    c.bench_function("rerun_all_recorded_8_stages", |b| {
        b.iter(|| {
            let ctx = (0..8).fold(ProvisioningContext::new(tenant.clone()), |ctx, i| {
                ctx.with_resource(format!("kind-{i}"), ResourceHandle::with_id("existing"))
                    .expect("unique kinds")
            });
            let report = runtime.block_on(orchestrator.run_with_context(ctx, &ctx_pipeline));
            black_box(report.status)
        });
    });
}

criterion_group!(benches, pipeline_benchmark);
criterion_main!(benches);
