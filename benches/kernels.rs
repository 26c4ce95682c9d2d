criterion::criterion_main!(benches);
criterion::criterion_group! {
    name = benches;
    config = criterion::Criterion::default()
        .without_plots()
        .noise_threshold(3.0)
        .significance_level(0.01)
        .sample_size(10)
        .measurement_time(std::time::Duration::from_secs(1));
    targets =
        computing_sma,
        computing_std,
        computing_ema,
        computing_adaptive_smooth,
        evaluating_expression_tree,
        running_mcts_simulations,
}

fn series(n: usize) -> Vec<f64> {
    (0..n).map(|i| 100.0 + (i as f64 * 0.03).sin() * 4.0).collect()
}

fn computing_sma(c: &mut criterion::Criterion) {
    let data = series(5_000);
    c.bench_function("sma over 5000 bars", |b| b.iter(|| discovery_core::dsl::kernels::sma(&data, 20)));
}

fn computing_std(c: &mut criterion::Criterion) {
    let data = series(5_000);
    c.bench_function("rolling std over 5000 bars", |b| b.iter(|| discovery_core::dsl::kernels::std(&data, 20)));
}

fn computing_ema(c: &mut criterion::Criterion) {
    let data = series(5_000);
    c.bench_function("ema over 5000 bars", |b| b.iter(|| discovery_core::dsl::kernels::ema(&data, 20)));
}

fn computing_adaptive_smooth(c: &mut criterion::Criterion) {
    let data = series(5_000);
    c.bench_function("adaptive smoothing over 5000 bars", |b| {
        b.iter(|| discovery_core::dsl::kernels::adaptive_smooth(&data, 2.0, 30.0))
    });
}

fn evaluating_expression_tree(c: &mut criterion::Criterion) {
    use discovery_core::dsl::{Context, Expr, RollingOp};
    let close = series(5_000);
    let ctx = Context::new(close.len()).with_field("close", close);
    let tree = Expr::Rolling(RollingOp::Sma, Box::new(Expr::Field("close".into())), 20);
    c.bench_function("evaluate a depth-1 rolling expression", |b| b.iter(|| tree.eval(&ctx)));
}

fn running_mcts_simulations(c: &mut criterion::Criterion) {
    use discovery_core::games::tictactoe::TicTacToe;
    use discovery_core::games::GameState;
    use discovery_core::mcts::{Evaluator, Mcts};
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    struct UniformEvaluator;
    impl Evaluator<TicTacToe> for UniformEvaluator {
        fn evaluate(&self, _state: &TicTacToe) -> (Vec<f64>, f64, Vec<f64>) {
            (vec![0.0; TicTacToe::action_size()], 0.5, vec![0.0; 8])
        }
    }

    c.bench_function("run 100 MCTS simulations on an empty board", |b| {
        b.iter(|| {
            let mut rng = SmallRng::seed_from_u64(1);
            let mut mcts = Mcts::new(TicTacToe::initial(), &UniformEvaluator, &mut rng);
            mcts.run(&UniformEvaluator, 100, None, |_| {});
        })
    });
}
