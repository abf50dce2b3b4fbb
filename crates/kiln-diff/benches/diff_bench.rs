//! Diff engine benchmarks for Kiln.
//!
//! Benchmarks:
//! - LCS edit scripts at various file sizes
//! - Hunk building for scattered edits

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kiln_diff::{build_hunks, diff_text, edit_script, DiffOptions, DEFAULT_CONTEXT};
use std::hint::black_box;

/// Generates a source-like file and a copy with every tenth line edited.
fn file_pair(lines: usize) -> (String, String) {
    let old: Vec<String> = (0..lines).map(|i| format!("    let value_{} = {};", i, i)).collect();
    let new: Vec<String> = old
        .iter()
        .enumerate()
        .map(|(i, line)| if i % 10 == 0 { format!("{} // edited", line) } else { line.clone() })
        .collect();
    (old.join("\n"), new.join("\n"))
}

fn bench_edit_script(c: &mut Criterion) {
    let mut group = c.benchmark_group("lcs_edit_script");

    for lines in [100, 500, 2_000].iter() {
        let (old, new) = file_pair(*lines);
        let old_lines: Vec<&str> = old.lines().collect();
        let new_lines: Vec<&str> = new.lines().collect();
        group.throughput(Throughput::Elements(*lines as u64));
        group.bench_with_input(BenchmarkId::new("lines", lines), lines, |b, _| {
            b.iter(|| black_box(edit_script(&old_lines, &new_lines, usize::MAX)));
        });
    }

    group.finish();
}

fn bench_hunks(c: &mut Criterion) {
    let (old, new) = file_pair(2_000);
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let edits = edit_script(&old_lines, &new_lines, usize::MAX);

    c.bench_function("build_hunks_2000_lines", |b| {
        b.iter(|| black_box(build_hunks(&old_lines, &new_lines, &edits, DEFAULT_CONTEXT)));
    });
}

fn bench_replacement_fallback(c: &mut Criterion) {
    let (old, new) = file_pair(2_000);
    let options = DiffOptions {
        max_cells: 1_000,
        ..DiffOptions::default()
    };
    c.bench_function("diff_text_replacement_fallback", |b| {
        b.iter(|| black_box(diff_text(&old, &new, &options)));
    });
}

criterion_group!(benches, bench_edit_script, bench_hunks, bench_replacement_fallback);
criterion_main!(benches);
