use anyhow::{bail, Context};
use flate2::read::GzDecoder;
use nalgebra::DMatrix;
use nsbm::{Graph, GraphBuilder, WeightMode};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

///
/// Open a file for reading, and return a buffered reader
/// * `input_file` - file name--either gzipped or not
///
pub fn open_buf_reader(input_file: &str) -> anyhow::Result<Box<dyn BufRead>> {
    let ext = Path::new(input_file).extension().and_then(|x| x.to_str());
    let file = File::open(input_file).with_context(|| format!("failed to open {}", input_file))?;
    match ext {
        Some("gz") => Ok(Box::new(BufReader::new(GzDecoder::new(file)))),
        _ => Ok(Box::new(BufReader::new(file))),
    }
}

///
/// Open a file for writing, and return a buffered writer
/// * `output_file` - file name--either gzipped or not
///
pub fn open_buf_writer(output_file: &str) -> anyhow::Result<Box<dyn Write>> {
    if output_file.eq_ignore_ascii_case("stdout") {
        return Ok(Box::new(BufWriter::new(std::io::stdout())));
    }

    let ext = Path::new(output_file).extension().and_then(|x| x.to_str());
    let file = File::create(output_file).with_context(|| format!("failed to create {}", output_file))?;
    match ext {
        Some("gz") => {
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            Ok(Box::new(BufWriter::new(encoder)))
        }
        _ => Ok(Box::new(BufWriter::new(file))),
    }
}

fn is_skipped(line: &str) -> bool {
    let t = line.trim();
    t.is_empty() || t.starts_with('#') || t.starts_with('%')
}

/// Read a whitespace-separated edge list: `source target [weight]`.
///
/// Lines starting with `#` or `%` are comments. Vertices are `0..n` where
/// `n` is `num_vertices` or one past the largest index seen.
pub fn read_edge_list(file: &str, directed: bool, num_vertices: Option<usize>) -> anyhow::Result<Graph> {
    let buf = open_buf_reader(file)?;
    let mut raw: Vec<(usize, usize, f64)> = vec![];

    for (lineno, line) in buf.lines().enumerate() {
        let line = line?;
        if is_skipped(&line) {
            continue;
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.len() < 2 {
            bail!("{}:{}: expected `source target [weight]`", file, lineno + 1);
        }
        let u: usize = words[0]
            .parse()
            .with_context(|| format!("{}:{}: bad source `{}`", file, lineno + 1, words[0]))?;
        let v: usize = words[1]
            .parse()
            .with_context(|| format!("{}:{}: bad target `{}`", file, lineno + 1, words[1]))?;
        let w: f64 = match words.get(2) {
            Some(x) => x
                .parse()
                .with_context(|| format!("{}:{}: bad weight `{}`", file, lineno + 1, x))?,
            None => 1.0,
        };
        raw.push((u, v, w));
    }

    let seen = raw.iter().map(|&(u, v, _)| u.max(v) + 1).max().unwrap_or(0);
    let n = match num_vertices {
        Some(n) if n < seen => bail!("edge list mentions vertex {} but --num-vertices is {}", seen - 1, n),
        Some(n) => n,
        None => seen,
    };

    let mut builder = GraphBuilder::new(n, directed);
    for (u, v, w) in raw {
        builder.add_edge(u, v, w);
    }
    Ok(builder.build(WeightMode::Weight)?)
}

/// One non-negative integer label per line
pub fn read_labels(file: &str) -> anyhow::Result<Vec<usize>> {
    let buf = open_buf_reader(file)?;
    let mut labels = vec![];
    for (lineno, line) in buf.lines().enumerate() {
        let line = line?;
        if is_skipped(&line) {
            continue;
        }
        let x = line.trim();
        labels.push(
            x.parse()
                .with_context(|| format!("{}:{}: bad label `{}`", file, lineno + 1, x))?,
        );
    }
    Ok(labels)
}

pub fn read_string(file: &str) -> anyhow::Result<String> {
    let mut buf = open_buf_reader(file)?;
    let mut out = String::new();
    buf.read_to_string(&mut out)?;
    Ok(out)
}

/// Tab-separated `vertex level_a level_b ...` with a header, one column
/// per entry of `levels`
pub fn write_level_labels(
    labels: &[Vec<usize>],
    levels: &[usize],
    vertices: Option<&[usize]>,
    output_file: &str,
) -> anyhow::Result<()> {
    let mut buf = open_buf_writer(output_file)?;
    let n = labels.first().map(|x| x.len()).unwrap_or(0);

    let header: Vec<String> = std::iter::once("vertex".to_string())
        .chain(levels.iter().map(|l| format!("level_{}", l)))
        .collect();
    writeln!(buf, "{}", header.join("\t"))?;

    for i in 0..n {
        let vertex = vertices.map(|v| v[i]).unwrap_or(i);
        let row: Vec<String> = std::iter::once(vertex.to_string())
            .chain(labels.iter().map(|level| level[i].to_string()))
            .collect();
        writeln!(buf, "{}", row.join("\t"))?;
    }
    buf.flush()?;
    Ok(())
}

/// Tab-separated matrix with one row per vertex
pub fn write_matrix(mat: &DMatrix<f64>, output_file: &str) -> anyhow::Result<()> {
    let mut buf = open_buf_writer(output_file)?;
    for i in 0..mat.nrows() {
        let row: Vec<String> = mat.row(i).iter().map(|x| format!("{:.6}", x)).collect();
        writeln!(buf, "{}", row.join("\t"))?;
    }
    buf.flush()?;
    Ok(())
}

pub fn write_json<T: serde::Serialize>(value: &T, output_file: &str) -> anyhow::Result<()> {
    let mut buf = open_buf_writer(output_file)?;
    serde_json::to_writer_pretty(&mut buf, value)?;
    writeln!(buf)?;
    buf.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_list_round_trip_gz() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("edges.tsv.gz");
        let path = path.to_str().unwrap();
        {
            let mut w = open_buf_writer(path)?;
            writeln!(w, "# toy")?;
            writeln!(w, "0\t1\t2.5")?;
            writeln!(w, "1 2")?;
            w.flush()?;
        }
        let g = read_edge_list(path, false, None)?;
        assert_eq!(g.num_vertices(), 3);
        assert_eq!(g.num_edges(), 2);
        assert!((g.total_weight() - 3.5).abs() < 1e-12);

        let padded = read_edge_list(path, false, Some(5))?;
        assert_eq!(padded.num_vertices(), 5);
        assert!(read_edge_list(path, false, Some(2)).is_err());
        Ok(())
    }

    #[test]
    fn test_bad_line_is_reported() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("edges.tsv");
        std::fs::write(&path, "0 1\nfoo 2\n")?;
        let err = read_edge_list(path.to_str().unwrap(), false, None).unwrap_err();
        assert!(err.to_string().contains(":2:"));
        Ok(())
    }

    #[test]
    fn test_level_labels_layout() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("levels.tsv");
        let path = path.to_str().unwrap();
        write_level_labels(&[vec![0, 0, 1], vec![0, 0, 0]], &[0, 2], Some(&[4, 7, 9]), path)?;
        let text = std::fs::read_to_string(path)?;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "vertex\tlevel_0\tlevel_2");
        assert_eq!(lines[3], "9\t1\t0");
        Ok(())
    }
}
