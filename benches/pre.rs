use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pre::{
    block::{BasicBlockBuilder, Frequency},
    opcode::Opcode,
    procedure::Procedure,
    symbol::{Symbol, SymbolKind},
    typ::Type,
    Options, PassEnv,
};

/// `count` diamonds in a row, each arm loading `p.f` and adding it to `a`.
fn diamond_chain(count: usize) -> Procedure {
    let mut proc = Procedure::new(Options::default());
    let p = proc.add_symbol(Symbol::new(SymbolKind::Parameter, Type::Address, "p"));
    let f = proc.add_symbol(Symbol::new(SymbolKind::Field { owner: 1, offset: 8 }, Type::Int32, "f"));
    let a = proc.add_symbol(Symbol::new(SymbolKind::Parameter, Type::Int32, "a"));
    let x = proc.add_symbol(Symbol::new(SymbolKind::Local, Type::Int32, "x"));

    let mut head = proc.add_block(1.0);

    for _ in 0..count {
        let left = proc.add_block(0.5);
        let right = proc.add_block(0.5);
        let join = proc.add_block(1.0);

        {
            let mut builder = BasicBlockBuilder::new(&mut proc, head);
            let c = builder.load(x);
            builder.branch(c, (left, Frequency::Normal), (right, Frequency::Normal));
        }

        for arm in [left, right] {
            let mut builder = BasicBlockBuilder::new(&mut proc, arm);
            let base = builder.load(p);
            let field = builder.load_indirect(f, base);
            builder.null_check(field);
            let la = builder.load(a);
            let sum = builder.binary(Opcode::Add, field, la);
            builder.store(x, sum);
            builder.goto(join);
        }

        head = join;
    }

    let mut builder = BasicBlockBuilder::new(&mut proc, head);
    let base = builder.load(p);
    let field = builder.load_indirect(f, base);
    builder.null_check(field);
    builder.ret(Some(field));

    proc
}

/// A counted loop whose body recomputes `a * b` and `p.f` every iteration.
fn invariant_loop() -> Procedure {
    let mut proc = Procedure::new(Options::default());
    let p = proc.add_symbol(Symbol::new(SymbolKind::Parameter, Type::Address, "p"));
    let f = proc.add_symbol(Symbol::new(SymbolKind::Field { owner: 1, offset: 8 }, Type::Int32, "f"));
    let a = proc.add_symbol(Symbol::new(SymbolKind::Parameter, Type::Int32, "a"));
    let b = proc.add_symbol(Symbol::new(SymbolKind::Parameter, Type::Int32, "b"));
    let i = proc.add_symbol(Symbol::new(SymbolKind::Local, Type::Int32, "i"));
    let acc = proc.add_symbol(Symbol::new(SymbolKind::Local, Type::Int32, "acc"));

    let entry = proc.add_block(1.0);
    let header = proc.add_block(1.0);
    let body = proc.add_block(1.0);
    let exit = proc.add_block(1.0);

    {
        let mut builder = BasicBlockBuilder::new(&mut proc, entry);
        let zero = builder.int32(0);
        builder.store(i, zero);
        builder.store(acc, zero);
        builder.goto(header);
    }
    {
        let mut builder = BasicBlockBuilder::new(&mut proc, header);
        let li = builder.load(i);
        let lb = builder.load(b);
        let cmp = builder.binary(Opcode::LessThan, li, lb);
        builder.branch(cmp, (body, Frequency::Normal), (exit, Frequency::Normal));
    }
    {
        let mut builder = BasicBlockBuilder::new(&mut proc, body);
        let la = builder.load(a);
        let lb = builder.load(b);
        let product = builder.binary(Opcode::Mul, la, lb);
        let base = builder.load(p);
        let field = builder.load_indirect(f, base);
        builder.null_check(field);
        let sum = builder.binary(Opcode::Add, product, field);
        let lacc = builder.load(acc);
        let next = builder.binary(Opcode::Add, lacc, sum);
        builder.store(acc, next);
        let li = builder.load(i);
        let one = builder.int32(1);
        let step = builder.binary(Opcode::Add, li, one);
        builder.store(i, step);
        builder.goto(header);
    }
    {
        let mut builder = BasicBlockBuilder::new(&mut proc, exit);
        let lacc = builder.load(acc);
        builder.ret(Some(lacc));
    }

    proc
}

fn optimize(mut proc: Procedure) -> Procedure {
    let _ = black_box(pre::run(&mut proc, &mut PassEnv::default()));
    proc
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("PartialRedundancy");

    for count in [4usize, 32, 128] {
        group.bench_with_input(format!("diamond chain ({})", count), &count, |b, count| {
            b.iter(|| optimize(diamond_chain(*count)))
        });
    }

    group.bench_function("loop invariant", |b| b.iter(|| optimize(invariant_loop())));

    group.bench_function("catalog only", |b| {
        b.iter(|| {
            let proc = diamond_chain(32);
            black_box(pre::candidates::CandidateCatalog::build(&proc).map(|c| c.len()))
        })
    });

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
