use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use depsnap::blacklist::Blacklist;
use depsnap::extract::{DependencyExtractor, EnvIndex, ExtractOptions};
use depsnap::trace::strace::parse_args;
use depsnap::trace::{StraceParser, parse_file, parse_lines};
use std::fs;
use std::hint::black_box;
use tempfile::tempdir;

fn synthetic_log(lines: usize) -> Vec<String> {
    (0..lines)
        .map(|i| match i % 5 {
            0 => format!(
                "[pid {}] openat(AT_FDCWD, \"/usr/include/sys/header_{i}.h\", O_RDONLY|O_CLOEXEC) = 3",
                1000 + i % 7
            ),
            1 => format!(
                "openat(AT_FDCWD, \"/opt/sdk/lib/libmissing_{i}.so\", O_RDONLY|O_CLOEXEC) = -1 ENOENT (No such file or directory)"
            ),
            2 => format!(
                "newfstatat(AT_FDCWD, \"/opt/sdk/include/a_{i}.h\", {{st_mode=S_IFREG|0644, st_size=1024, ...}}, 0) = 0"
            ),
            3 => format!(
                "execve(\"/usr/bin/cc\", [\"cc\", \"-c\", \"src/file_{i}.c\", \"-o\", \"obj/file_{i}.o\"], 0x7ffd5f1c9a38 /* 42 vars */) = 0"
            ),
            _ => format!("readlink(\"/opt/sdk/lib/libfoo.so.{i}\", \"libfoo.so\", 4095) = 9"),
        })
        .collect()
}

fn benchmark_parse_lines(c: &mut Criterion) {
    let mut group = c.benchmark_group("strace_parse_lines");

    for size in [1_000, 10_000, 100_000] {
        let log = synthetic_log(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &log, |b, log| {
            b.iter(|| parse_lines(&StraceParser, black_box(log.iter().map(String::as_str))));
        });
    }

    group.finish();
}

fn benchmark_parse_file(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("trace.log");
    fs::write(&path, synthetic_log(50_000).join("\n")).unwrap();

    c.bench_function("strace_parse_file_50k", |b| {
        b.iter(|| parse_file(&StraceParser, black_box(&path)).unwrap());
    });
}

fn benchmark_tokenizer(c: &mut Criterion) {
    let raw = "AT_FDCWD, \"/tmp/a, (b)\", {st_mode=S_IFREG|0644, st_size=1024, st_blocks=8, ...}, [\"x\", \"y\"], 0)";

    c.bench_function("parse_args_nested", |b| {
        b.iter(|| parse_args(black_box(raw)));
    });
}

fn benchmark_extract(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let cwd = root.join("proj");
    fs::create_dir_all(&cwd).unwrap();
    fs::create_dir_all(root.join("sdk")).unwrap();

    let lines: Vec<String> = (0..200)
        .map(|i| {
            let file = root.join(format!("sdk/dep_{i}.h"));
            fs::write(&file, format!("#define DEP_{i} {i}\n")).unwrap();
            format!("open(\"{}\", O_RDONLY) = 3", file.display())
        })
        .collect();
    let events = parse_lines(&StraceParser, lines.iter().map(String::as_str));

    c.bench_function("extract_200_files", |b| {
        b.iter(|| {
            let mut options = ExtractOptions::new(cwd.clone());
            options.system_root = None;
            let mut extractor =
                DependencyExtractor::new(options, Blacklist::new(&cwd), EnvIndex::default());
            extractor.extract(black_box(&events));
            extractor.dependencies().entries().len()
        });
    });
}

criterion_group!(
    benches,
    benchmark_parse_lines,
    benchmark_parse_file,
    benchmark_tokenizer,
    benchmark_extract
);
criterion_main!(benches);
