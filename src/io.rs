//! Edge list loading and rank shard writing.
use std::fs::{self, File};
use std::io::{Write,BufWriter,BufReader,BufRead};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use itertools::Itertools;
use log::{debug, info};
use rayon::prelude::*;
use ryu::Buffer;

use crate::error::{RankError, Result};
use crate::graph::{EdgeList, GraphInfo, NodeID};
use crate::ranks::{PartitionedRanks, RankSegment};

/// Parses lines in parallel, chunk by chunk, while handing the records to
/// `drain` in input order.
struct RecordReader {
    chunk_size: usize
}

impl RecordReader {
    pub fn new(chunk_size: usize) -> Self {
        RecordReader { chunk_size }
    }

    /// `mapper` receives 1-based line numbers; lines it maps to `None` are
    /// skipped.
    pub fn read<F,D,A,E>(
        &self,
        it: impl Iterator<Item=std::result::Result<String,E>>,
        mapper: F,
        mut drain: D
    ) -> std::result::Result<(),E>
        where F: Fn(usize, &str) -> Option<A> + Sync,
              A: Send,
              D: FnMut(usize, A) -> std::result::Result<(),E>
    {
        if self.chunk_size <= 1 {
            for (i, line) in it.enumerate() {
                if let Some(record) = mapper(i + 1, &line?) {
                    drain(i + 1, record)?
                }
            }
        } else {
            let mut i = 0;
            let mut buffer = Vec::with_capacity(self.chunk_size);
            let mut p_buffer = Vec::with_capacity(self.chunk_size);
            for chunk in &it.chunks(self.chunk_size) {
                buffer.clear();

                // Read lines into a buffer for parallelizing
                for line in chunk {
                    buffer.push(line?);
                }

                buffer.par_iter().enumerate().map(|(idx, line)| {
                    mapper(i + idx + 1, line)
                }).collect_into_vec(&mut p_buffer);

                for r in p_buffer.drain(..) {
                    i += 1;
                    if let Some(record) = r {
                        drain(i, record)?;
                    }
                }
            }
        }
        Ok(())
    }

}

pub fn open_file_for_reading(path: &Path) -> Result<Box<dyn BufRead>> {
    let f = File::open(path).map_err(|e| RankError::io(path, e))?;

    let f = BufReader::new(f);
    let is_gz = path.extension().map(|ext| ext == "gz").unwrap_or(false);
    let result: Box<dyn BufRead> = if is_gz {
        let decoder = BufReader::new(GzDecoder::new(f));
        Box::new(decoder)
    } else {
        Box::new(f)
    };
    Ok(result)
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadOpts {
    /// Edge list file, or a directory whose files are all edge lists
    pub input: PathBuf,

    /// Undirected edges are followed both ways
    pub directed: bool,

    /// Vertex count; defaults to the largest id seen plus one
    pub vertices: Option<usize>,

    /// Lines parsed in parallel at a time
    pub chunk_size: usize
}

impl Default for LoadOpts {
    fn default() -> Self {
        LoadOpts { input: PathBuf::new(), directed: false, vertices: None, chunk_size: 10_000 }
    }
}

impl LoadOpts {
    pub fn new(input: impl Into<PathBuf>, directed: bool) -> Self {
        LoadOpts { input: input.into(), directed, ..Default::default() }
    }

    pub fn validate(&self) -> Result<()> {
        if self.input.as_os_str().is_empty() {
            return Err(RankError::config("An input path is required"))
        }
        if self.chunk_size == 0 {
            return Err(RankError::config("chunk_size must be positive"))
        }
        Ok(())
    }
}

pub struct EdgeReader;

impl EdgeReader {

    /// Reads every edge of the input.  One edge per line, `src,dst` or
    /// whitespace separated; further fields are ignored.  Empty lines and
    /// lines starting with `#` are skipped.
    pub fn load(opts: &LoadOpts) -> Result<EdgeList> {
        opts.validate()?;
        let files = EdgeReader::input_files(&opts.input)?;

        let mut edges = Vec::new();
        for path in files.iter() {
            let before = edges.len();
            EdgeReader::read_file(path, opts.chunk_size, &mut edges)?;
            debug!("Read {} edges from {}", edges.len() - before, path.display());
        }

        let vertex_count = opts.vertices.unwrap_or_else(|| {
            edges.iter().map(|(s, d)| s.max(d).saturating_add(1)).max().unwrap_or(0)
        });

        let edge_list = EdgeList::new(GraphInfo::new(vertex_count, edges.len(), opts.directed), edges)?;
        info!("Loaded {} edges over {} vertices from {} file(s)",
              edge_list.info().edge_count, vertex_count, files.len());
        Ok(edge_list)
    }

    /// The input itself, or the visible files of a directory sorted by name.
    fn input_files(input: &Path) -> Result<Vec<PathBuf>> {
        let meta = fs::metadata(input).map_err(|e| RankError::io(input, e))?;
        if !meta.is_dir() {
            return Ok(vec![input.to_path_buf()])
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(input).map_err(|e| RankError::io(input, e))? {
            let entry = entry.map_err(|e| RankError::io(input, e))?;
            let path = entry.path();
            let hidden = entry.file_name().to_string_lossy().starts_with(|c: char| c == '.' || c == '_');
            if path.is_file() && !hidden {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn read_file(path: &Path, chunk_size: usize, edges: &mut Vec<(NodeID, NodeID)>) -> Result<()> {
        let reader = open_file_for_reading(path)?;
        let lines = reader.lines().map(|l| l.map_err(|e| RankError::io(path, e)));

        let rr = RecordReader::new(chunk_size);
        rr.read(lines,
            |line_no, line| {
                parse_edge(line).map(|edge| edge.ok_or_else(|| RankError::MalformedEdge {
                    path: path.to_path_buf(),
                    line: line_no,
                    content: line.to_string()
                }))
            },
            |_, record| {
                edges.push(record?);
                Ok(())
            })
    }
}

/// `None` for lines that carry no edge, `Some(None)` for lines that should
/// but can't be parsed.
fn parse_edge(line: &str) -> Option<Option<(NodeID, NodeID)>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None
    }

    let mut fields = line.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|f| !f.is_empty());

    let edge = match (fields.next(), fields.next()) {
        (Some(src), Some(dst)) => src.parse().ok().zip(dst.parse().ok()),
        _ => None
    };
    Some(edge)
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputOpts {
    pub dir: PathBuf,

    /// gzip level, 0 to 9
    pub compression: u32
}

impl Default for OutputOpts {
    fn default() -> Self {
        OutputOpts { dir: PathBuf::new(), compression: 6 }
    }
}

impl OutputOpts {
    pub fn new(dir: impl Into<PathBuf>, compression: u32) -> Self {
        OutputOpts { dir: dir.into(), compression }
    }

    pub fn validate(&self) -> Result<()> {
        if self.dir.as_os_str().is_empty() {
            return Err(RankError::config("An output directory is required"))
        }
        if self.compression > 9 {
            return Err(RankError::config(format!("compression must be in 0..=9, got {}", self.compression)))
        }
        Ok(())
    }

    pub fn shard_path(&self, partition: usize, thread: usize) -> PathBuf {
        self.dir.join(format!("{:04}_{:04}.csv.gz", partition, thread))
    }
}

/// One gzip compressed output file of `vertex,value` lines.
pub struct ShardWriter {
    path: PathBuf,
    encoder: GzEncoder<BufWriter<File>>,
    formatter: Buffer
}

impl ShardWriter {
    pub fn create(path: PathBuf, compression: u32) -> Result<Self> {
        let f = File::create(&path).map_err(|e| RankError::io(&path, e))?;
        let encoder = GzEncoder::new(BufWriter::new(f), Compression::new(compression));
        Ok(ShardWriter { path, encoder, formatter: Buffer::new() })
    }

    pub fn write(&mut self, vertex: NodeID, value: f64) -> Result<()> {
        writeln!(self.encoder, "{},{}", vertex, self.formatter.format(value))
            .map_err(|e| RankError::io(&self.path, e))
    }

    /// Writes the gzip trailer and flushes the file.
    pub fn finish(self) -> Result<PathBuf> {
        let path = self.path;
        let bw = self.encoder.finish().map_err(|e| RankError::io(&path, e))?;
        bw.into_inner().map_err(|e| RankError::io(&path, e.into_error()))?;
        Ok(path)
    }
}

/// Writes `threads` shards per partition, each worker streaming a contiguous
/// chunk of the partition's ranks into its own file.  Returns the shard paths
/// in partition then worker order.
pub fn write_shards(ranks: &PartitionedRanks, threads: usize, opts: &OutputOpts) -> Result<Vec<PathBuf>> {
    opts.validate()?;
    if threads == 0 {
        return Err(RankError::config("At least one writer per partition is required"))
    }
    fs::create_dir_all(&opts.dir).map_err(|e| RankError::io(&opts.dir, e))?;

    let shards = ranks.segments().par_iter()
        .map(|segment| write_segment(segment, threads, opts))
        .collect::<Result<Vec<_>>>()?;

    let paths: Vec<_> = shards.into_iter().flatten().collect();
    info!("Wrote {} ranks to {} shards in {}", ranks.len(), paths.len(), opts.dir.display());
    Ok(paths)
}

fn write_segment(segment: &RankSegment, threads: usize, opts: &OutputOpts) -> Result<Vec<PathBuf>> {
    let mut writers = (0..threads)
        .map(|t| ShardWriter::create(opts.shard_path(segment.partition(), t), opts.compression))
        .collect::<Result<Vec<_>>>()?;

    let written = segment.for_each_with(&mut writers, |w, vertex, value| w.write(vertex, value));

    // Every shard gets finished, whatever happened to the others
    let finished: Vec<_> = writers.into_iter().map(|w| w.finish()).collect();
    written?;
    finished.into_iter().collect()
}
