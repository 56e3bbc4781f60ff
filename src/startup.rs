use bio::io::fasta;
use divseq::{
    build_cluster_tree, build_cluster_tree_parallel, distance_matrix, mash_matrix,
    select_max_with, select_n_most, ClusterTree, DivergenceMatrix, MashConfig, MaxConfig, Metric,
    MoleculeType, Record, Stat,
};
use std::{
    error::Error,
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};
use tracing::info;

/// Options shared by every subcommand
#[derive(Debug, Clone)]
pub struct Common {
    pub input: String,
    pub moltype: MoleculeType,
    pub k: usize,
    pub output: Option<String>,
}

/// Tree serialisation format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TreeFormat {
    Newick,
    Json,
}

/// Read every FASTA record of `path` as `moltype`
pub fn load_records<P: AsRef<Path> + std::fmt::Debug>(
    path: P,
    moltype: MoleculeType,
) -> Result<Vec<Record>, Box<dyn Error>> {
    info!("Loading records from {:?}", path);
    let mut records = Vec::new();
    for result in fasta::Reader::from_file(&path)?.records() {
        let record = result?;
        records.push(Record::new(record.id(), record.seq(), moltype));
    }
    if records.is_empty() {
        return Err(format!("No records found in {:?}", path).into());
    }
    info!("Loaded {} records", records.len());
    Ok(records)
}

fn open_output(output: Option<&str>) -> Result<Box<dyn Write>, Box<dyn Error>> {
    Ok(match output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    })
}

pub fn write_fasta<W: Write>(records: &[Record], out: W) -> io::Result<()> {
    let mut writer = fasta::Writer::new(out);
    for record in records {
        writer.write(record.id(), None, record.seq())?;
    }
    writer.flush()
}

pub fn write_tree<W: Write>(
    tree: &ClusterTree,
    format: TreeFormat,
    mut out: W,
) -> Result<(), Box<dyn Error>> {
    match format {
        TreeFormat::Newick => writeln!(out, "{}", tree.to_newick())?,
        TreeFormat::Json => {
            serde_json::to_writer_pretty(&mut out, tree)?;
            writeln!(out)?;
        }
    }
    out.flush()?;
    Ok(())
}

/// Square matrix as TSV with a header row and one row per record
pub fn write_matrix<W: Write>(matrix: &DivergenceMatrix, mut out: W) -> io::Result<()> {
    writeln!(out, "id\t{}", matrix.ids().join("\t"))?;
    for (id, row) in matrix.ids().iter().zip(matrix.values().rows()) {
        let values: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        writeln!(out, "{}\t{}", id, values.join("\t"))?;
    }
    out.flush()
}

pub fn run_nmost(
    common: &Common,
    n: usize,
    stat: Stat,
    seed: Option<u64>,
) -> Result<(), Box<dyn Error>> {
    let records = load_records(&common.input, common.moltype)?;
    let chosen = select_n_most(&records, n, common.k, common.moltype, stat, seed)?;
    write_fasta(&chosen, open_output(common.output.as_deref())?)?;
    info!("Wrote {} records", chosen.len());
    Ok(())
}

pub fn run_max(
    common: &Common,
    config: &MaxConfig,
    stat: Stat,
    seed: Option<u64>,
) -> Result<(), Box<dyn Error>> {
    let records = load_records(&common.input, common.moltype)?;
    let chosen = select_max_with(&records, config, common.k, common.moltype, stat, seed)?;
    write_fasta(&chosen, open_output(common.output.as_deref())?)?;
    info!("Wrote {} records", chosen.len());
    Ok(())
}

pub fn run_tree(
    common: &Common,
    stat: Stat,
    workers: Option<usize>,
    seed: Option<u64>,
    format: TreeFormat,
) -> Result<(), Box<dyn Error>> {
    let records = load_records(&common.input, common.moltype)?;
    let tree = match workers {
        Some(workers) => {
            build_cluster_tree_parallel(&records, common.k, common.moltype, stat, workers, seed)?
        }
        None => build_cluster_tree(&records, common.k, common.moltype, stat)?,
    };
    write_tree(&tree, format, open_output(common.output.as_deref())?)?;
    info!("Wrote tree with {} leaves", tree.leaf_count());
    Ok(())
}

/// `metric` is a [`Metric`] name or `mash`
pub fn run_dist(
    common: &Common,
    metric: &str,
    mash: &MashConfig,
) -> Result<(), Box<dyn Error>> {
    let records = load_records(&common.input, common.moltype)?;
    let matrix = if metric.eq_ignore_ascii_case("mash") {
        mash_matrix(&records, common.k, common.moltype, mash)?
    } else {
        let metric: Metric = metric.parse()?;
        distance_matrix(&records, common.k, common.moltype, metric)?
    };
    write_matrix(&matrix, open_output(common.output.as_deref())?)?;
    info!("Wrote {0}x{0} matrix", matrix.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use divseq::TreeNode;

    #[test]
    fn test_write_fasta() {
        let records = vec![
            Record::new("a", "ACGT", MoleculeType::Dna),
            Record::new("b", "TTGA", MoleculeType::Dna),
        ];
        let mut out = Vec::new();
        write_fasta(&records, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), ">a\nACGT\n>b\nTTGA\n");
    }

    #[test]
    fn test_write_matrix() {
        let matrix =
            DivergenceMatrix::from_fn(vec!["x".to_string(), "y".to_string()], |_, _| 0.25);
        let mut out = Vec::new();
        write_matrix(&matrix, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "id\tx\ty\nx\t0\t0.25\ny\t0.25\t0\n"
        );
    }

    #[test]
    fn test_write_tree_newick() {
        let tree = ClusterTree::new(TreeNode::internal(
            TreeNode::leaf("a", 0),
            TreeNode::leaf("b", 1),
            0.4,
        ));
        let mut out = Vec::new();
        write_tree(&tree, TreeFormat::Newick, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "(a:0.4,b:0.4);\n");
    }
}
