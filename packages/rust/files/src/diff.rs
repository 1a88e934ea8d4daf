//! Line-based unified diffs.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Equal,
    Delete,
    Insert,
}

#[derive(Debug, Clone, Copy)]
struct Op<'a> {
    kind: Kind,
    line: &'a str,
    /// Index in the old file of this line (or of the next old line for inserts).
    old: usize,
    /// Index in the new file of this line (or of the next new line for deletes).
    new: usize,
}

/// Above this many DP cells the changed middle is emitted as one block.
const MAX_LCS_CELLS: usize = 4_000_000;

/// Render a unified diff between `old` and `new` with `context` lines.
/// Returns an empty string when the texts are line-for-line equal.
pub fn unified_diff(old: &str, new: &str, from: &str, to: &str, context: usize) -> String {
    let a: Vec<&str> = old.lines().collect();
    let b: Vec<&str> = new.lines().collect();
    let ops = diff_ops(&a, &b);
    if ops.iter().all(|op| op.kind == Kind::Equal) {
        return String::new();
    }

    let mut out = format!("--- {from}\n+++ {to}\n");
    for (start, end) in hunks(&ops, context) {
        let slice = &ops[start..end];
        let old_start = slice[0].old;
        let new_start = slice[0].new;
        let old_len = slice.iter().filter(|op| op.kind != Kind::Insert).count();
        let new_len = slice.iter().filter(|op| op.kind != Kind::Delete).count();
        out.push_str(&format!(
            "@@ -{} +{} @@\n",
            format_range(old_start, old_len),
            format_range(new_start, new_len)
        ));
        for op in slice {
            let sign = match op.kind {
                Kind::Equal => ' ',
                Kind::Delete => '-',
                Kind::Insert => '+',
            };
            out.push(sign);
            out.push_str(op.line);
            out.push('\n');
        }
    }
    out
}

fn format_range(start: usize, len: usize) -> String {
    match len {
        0 => format!("{start},0"),
        1 => format!("{}", start + 1),
        _ => format!("{},{len}", start + 1),
    }
}

/// Group change ops into hunk ranges `[start, end)` over `ops`.
fn hunks(ops: &[Op<'_>], context: usize) -> Vec<(usize, usize)> {
    let changes: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| op.kind != Kind::Equal)
        .map(|(idx, _)| idx)
        .collect();

    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for idx in changes {
        let start = idx.saturating_sub(context);
        let end = (idx + 1 + context).min(ops.len());
        match ranges.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => ranges.push((start, end)),
        }
    }
    ranges
}

fn diff_ops<'a>(a: &[&'a str], b: &[&'a str]) -> Vec<Op<'a>> {
    let prefix = a.iter().zip(b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    let mut ops = Vec::with_capacity(a.len().max(b.len()));
    for (i, line) in a[..prefix].iter().copied().enumerate() {
        ops.push(Op {
            kind: Kind::Equal,
            line,
            old: i,
            new: i,
        });
    }

    let mid_a = &a[prefix..a.len() - suffix];
    let mid_b = &b[prefix..b.len() - suffix];
    middle_ops(mid_a, mid_b, prefix, prefix, &mut ops);

    for k in 0..suffix {
        let i = a.len() - suffix + k;
        let j = b.len() - suffix + k;
        ops.push(Op {
            kind: Kind::Equal,
            line: a[i],
            old: i,
            new: j,
        });
    }
    ops
}

fn middle_ops<'a>(a: &[&'a str], b: &[&'a str], off_a: usize, off_b: usize, ops: &mut Vec<Op<'a>>) {
    let (n, m) = (a.len(), b.len());
    if n == 0 || m == 0 || n.saturating_mul(m) > MAX_LCS_CELLS {
        for (i, line) in a.iter().copied().enumerate() {
            ops.push(Op {
                kind: Kind::Delete,
                line,
                old: off_a + i,
                new: off_b,
            });
        }
        for (j, line) in b.iter().copied().enumerate() {
            ops.push(Op {
                kind: Kind::Insert,
                line,
                old: off_a + n,
                new: off_b + j,
            });
        }
        return;
    }

    // lcs[i][j] = LCS length of a[i..] and b[j..]
    let width = m + 1;
    let mut lcs = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i * width + j] = if a[i] == b[j] {
                lcs[(i + 1) * width + j + 1] + 1
            } else {
                lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < n || j < m {
        if i < n && j < m && a[i] == b[j] {
            ops.push(Op {
                kind: Kind::Equal,
                line: a[i],
                old: off_a + i,
                new: off_b + j,
            });
            i += 1;
            j += 1;
        } else if i < n && (j == m || lcs[(i + 1) * width + j] >= lcs[i * width + j + 1]) {
            ops.push(Op {
                kind: Kind::Delete,
                line: a[i],
                old: off_a + i,
                new: off_b + j,
            });
            i += 1;
        } else {
            ops.push(Op {
                kind: Kind::Insert,
                line: b[j],
                old: off_a + i,
                new: off_b + j,
            });
            j += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_texts_produce_no_diff() {
        assert_eq!(unified_diff("a\nb\n", "a\nb\n", "x", "y", 3), "");
    }

    #[test]
    fn single_line_change_with_context() {
        let old = "one\ntwo\nthree\nfour\nfive\n";
        let new = "one\ntwo\nTHREE\nfour\nfive\n";
        let diff = unified_diff(old, new, "f (before)", "f (after)", 1);
        assert_eq!(
            diff,
            "--- f (before)\n+++ f (after)\n@@ -2,3 +2,3 @@\n two\n-three\n+THREE\n four\n"
        );
    }

    #[test]
    fn distant_changes_get_separate_hunks() {
        let old: String = (1..=20).map(|i| format!("l{i}\n")).collect();
        let new = old.replace("l2\n", "L2\n").replace("l19\n", "L19\n");
        let diff = unified_diff(&old, &new, "a", "b", 2);
        assert_eq!(diff.matches("@@ -").count(), 2);
        assert!(diff.contains("-l2\n+L2\n"));
        assert!(diff.contains("-l19\n+L19\n"));
    }

    #[test]
    fn pure_insertion_header() {
        let diff = unified_diff("a\n", "a\nb\n", "x", "y", 0);
        assert!(diff.contains("@@ -1,0 +2 @@\n+b\n"));
    }
}
