// vim: tw=80
use std::{
    collections::VecDeque,
    num::ParseIntError,
    path::PathBuf,
    process::exit,
    sync::{Arc, Mutex, PoisonError},
};

use clap::{crate_version, Parser, ValueEnum};
use itertools::Itertools;
use raidlib_core::{
    config::{ConfigError, LibraryConfig},
    iots::{Iots, IotsCompletion, IotsContext, Packet, StateStatus},
    opcode::{BlockOperation, BlockQualifier, BlockStatus, Opcode, Priority},
    position::{PositionBitmask, MAX_WIDTH},
    raid::*,
    siots::{SiotsExecutor, SiotsId, SiotsPool, SiotsRequest},
    BlockCount,
    Error,
    LbaT,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Raid(#[from] Error),
}

impl CliError {
    fn errno(&self) -> i32 {
        match self {
            CliError::Config(_) => libc::EINVAL,
            CliError::Raid(e) => e.errno(),
        }
    }
}

type Result<T> = std::result::Result<T, CliError>;

/// Accept either decimal or 0x-prefixed hexadecimal
fn parse_num(s: &str) -> std::result::Result<u64, ParseIntError> {
    match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse()
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PriorityArg {
    Low,
    Normal,
    Urgent,
}

impl From<PriorityArg> for Priority {
    fn from(p: PriorityArg) -> Self {
        match p {
            PriorityArg::Low => Priority::Low,
            PriorityArg::Normal => Priority::Normal,
            PriorityArg::Urgent => Priority::Urgent,
        }
    }
}

/// Describes a raid group
#[derive(clap::Args, Clone, Debug)]
struct GeometryArgs {
    /// raid0, raid1, raid3, raid5, raid6, raid10, individual-disk, ...
    #[clap(short = 't', long)]
    raid_type: RaidType,
    /// Member count.  For raid10, the number of mirrored pairs.
    #[clap(short, long)]
    width: u32,
    /// Use the large bandwidth element size
    #[clap(short, long)]
    bandwidth: bool,
    /// Exported capacity, in blocks
    #[clap(long, default_value = "0x1000000", value_parser = parse_num)]
    capacity: u64,
    #[clap(long, default_value = "0x800", value_parser = parse_num)]
    max_blocks_per_drive: u64,
}

impl GeometryArgs {
    fn build(&self) -> Result<RaidGeometry> {
        let class = self.raid_type.natural_class()
            .ok_or(Error::NotInitialized)?;
        let (es, epp) = determine_element_size(self.raid_type, self.bandwidth)
            .unwrap_or((SECTORS_PER_ELEMENT, 0));
        let mut g = RaidGeometry::new(0, class);
        g.set_configuration(self.width, self.raid_type, es, epp,
                            self.capacity, self.max_blocks_per_drive)?;
        debug!(raid_type = %self.raid_type, width = self.width, es, epp,
            "configured geometry");
        Ok(g)
    }
}

/// A host range
#[derive(clap::Args, Clone, Debug)]
struct Range {
    #[clap(value_parser = parse_num)]
    lba: LbaT,
    #[clap(value_parser = parse_num)]
    blocks: BlockCount,
}

fn check_range(range: &Range) -> Result<()> {
    if range.blocks == 0 {
        eprintln!("Error: a range must contain at least one block");
        return Err(Error::GenericFailure.into());
    }
    Ok(())
}

#[derive(Parser, Clone, Debug)]
/// Show the layout of a raid group
struct Geometry {
    #[clap(flatten)]
    geometry: GeometryArgs,
}

impl Geometry {
    fn main(self, config: &LibraryConfig) -> Result<()> {
        let g = self.geometry.build()?;
        let dd = g.data_disks()?;
        let stripe = u64::from(g.element_size()) * u64::from(dd);
        let widths = (1..=MAX_WIDTH)
            .filter(|w| {
                let disks = if g.is_raid10() { w * 2 } else { *w };
                validate_width(g.raid_type(), disks).is_ok()
            }).join(",");
        let mut table = tabular::Table::new("{:<}  {:>}");
        let mut add = |k: &str, v: String| {
            let mut row = tabular::Row::new();
            row.add_cell(k);
            row.add_cell(v);
            table.add_row(row);
        };
        add("raid type", g.raid_type().to_string());
        add("class", format!("{:?}", g.class()));
        add("width", g.width().to_string());
        add("valid widths", widths);
        add("data disks", dd.to_string());
        add("parity disks", g.parity_disks()?.to_string());
        add("element size", g.element_size().to_string());
        add("elements per parity", g.elements_per_parity().to_string());
        add("stripe size", stripe.to_string());
        add("chunk size", config.chunk_size.to_string());
        add("map chunks", g.total_map_chunks(config.chunk_size)?.to_string());
        print!("{table}");
        Ok(())
    }
}

#[derive(Parser, Clone, Debug)]
/// Map a host range onto parity-relative extents
struct StripeRange {
    #[clap(flatten)]
    range: Range,
    #[clap(short, long, default_value_t = SECTORS_PER_ELEMENT)]
    element_size: u32,
    #[clap(short, long)]
    data_disks: u16,
    #[clap(short, long, default_value_t = MAX_PARITY_EXTENTS)]
    max_extents: usize,
}

impl StripeRange {
    fn main(self) -> Result<()> {
        check_range(&self.range)?;
        if self.element_size == 0 || self.data_disks == 0 {
            eprintln!("Error: element size and data disks must be nonzero");
            return Err(Error::NotInitialized.into());
        }
        let extents = stripe_range(self.range.lba, self.range.blocks,
                                   self.element_size, self.data_disks,
                                   self.max_extents);
        let mut table = tabular::Table::new("{:<}  {:>}  {:>}");
        let mut hrow = tabular::Row::new();
        hrow.add_cell("EXTENT");
        hrow.add_cell("START");
        hrow.add_cell("BLOCKS");
        table.add_row(hrow);
        for (i, e) in extents.iter().enumerate().filter(|(_, e)| !e.is_empty())
        {
            let mut row = tabular::Row::new();
            row.add_cell(i);
            row.add_cell(e.start_lba);
            row.add_cell(e.size);
            table.add_row(row);
        }
        print!("{table}");
        Ok(())
    }
}

#[derive(Parser, Clone, Debug)]
/// Compute the stripe lock that a request needs
struct LockRange {
    #[clap(flatten)]
    geometry: GeometryArgs,
    #[clap(flatten)]
    range: Range,
    /// Lock for a background zero, which covers whole chunks
    #[clap(short, long, conflicts_with = "physical")]
    zero: bool,
    /// The range is per drive rather than host
    #[clap(short, long)]
    physical: bool,
}

impl LockRange {
    fn main(self, config: &LibraryConfig) -> Result<()> {
        check_range(&self.range)?;
        let g = self.geometry.build()?;
        let Range{lba, blocks} = self.range;
        let (start, count) = if self.zero {
            g.calculate_zero_lock_range(lba, blocks, config.chunk_size)?
        } else if self.physical {
            g.calculate_lock_range_physical(lba, blocks)?
        } else {
            g.calculate_lock_range(lba, blocks)?
        };
        let mut table = tabular::Table::new("{:>}  {:>}");
        let mut hrow = tabular::Row::new();
        hrow.add_cell("START");
        hrow.add_cell("COUNT");
        table.add_row(hrow);
        let mut row = tabular::Row::new();
        row.add_cell(start);
        row.add_cell(count);
        table.add_row(row);
        print!("{table}");
        Ok(())
    }
}

#[derive(Parser, Clone, Debug)]
/// Which paged metadata chunks does a host range touch?
struct ChunkRange {
    #[clap(flatten)]
    geometry: GeometryArgs,
    #[clap(flatten)]
    range: Range,
}

impl ChunkRange {
    fn main(self, config: &LibraryConfig) -> Result<()> {
        check_range(&self.range)?;
        let g = self.geometry.build()?;
        let (first, count) = g.calculate_chunk_range(self.range.lba,
            self.range.blocks, config.chunk_size)?;
        let mut table = tabular::Table::new("{:>}  {:>}");
        let mut hrow = tabular::Row::new();
        hrow.add_cell("CHUNK");
        hrow.add_cell("COUNT");
        table.add_row(hrow);
        let mut row = tabular::Row::new();
        row.add_cell(first);
        row.add_cell(count);
        table.add_row(row);
        print!("{table}");
        Ok(())
    }
}

#[derive(Parser, Clone, Debug)]
/// Price a request in I/O credits
struct Weight {
    #[clap(flatten)]
    geometry: GeometryArgs,
    #[clap(flatten)]
    range: Range,
    #[clap(short, long)]
    opcode: Opcode,
    /// The raid group is degraded
    #[clap(short, long)]
    degraded: bool,
    /// The range is being zeroed in the background
    #[clap(short, long)]
    zeroing: bool,
    /// Size of the credit pool
    #[clap(short, long, default_value_t = 100)]
    max_credits: u32,
    #[clap(long, value_enum, default_value = "normal")]
    priority: PriorityArg,
}

impl Weight {
    fn main(self, config: &LibraryConfig) -> Result<()> {
        let g = self.geometry.build()?;
        let costs = config.degraded_cost_config();
        let op = BlockOperation::new(self.opcode, self.range.lba,
                                     self.range.blocks);
        let req = IoCostRequest::new(&op, self.priority.into(),
                                     self.max_credits)
            .costs(&costs)
            .degraded(self.degraded)
            .zeroing(self.zeroing);
        println!("{}", g.disk_io_weight(&req)?);
        Ok(())
    }
}

struct IdlePacket;

impl Packet for IdlePacket {
    fn is_expired(&self) -> bool {
        false
    }

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Holds started SIOTS until the simulator completes them
#[derive(Default)]
struct QueueExecutor {
    queue: Mutex<VecDeque<SiotsRequest>>,
}

impl QueueExecutor {
    fn pop(&self) -> Option<SiotsRequest> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front()
    }
}

impl SiotsExecutor for QueueExecutor {
    fn start(&self, request: SiotsRequest) {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
            .push_back(request);
    }

    fn abort(&self, siots: SiotsId) {
        let request = {
            let mut q = self.queue.lock()
                .unwrap_or_else(PoisonError::into_inner);
            let i = q.iter().position(|r| r.id == siots);
            i.and_then(|i| q.remove(i))
        };
        if let Some(r) = request {
            let _ = r.iots.siots_complete(r.id, BlockStatus::RequestAborted,
                                          BlockQualifier::ClientAborted,
                                          PositionBitmask::EMPTY);
        }
    }
}

#[derive(Parser, Clone, Debug)]
/// Decompose a request into pieces and SIOTS, completing each SIOTS
/// successfully
struct Simulate {
    #[clap(flatten)]
    geometry: GeometryArgs,
    #[clap(flatten)]
    range: Range,
    #[clap(short, long, default_value = "write")]
    opcode: Opcode,
}

impl Simulate {
    fn main(self, config: &LibraryConfig) -> Result<()> {
        check_range(&self.range)?;
        let mut g = self.geometry.build()?;
        g.set_block_sizes(BE_BYTES_PER_BLOCK, BE_BYTES_PER_BLOCK, 1)?;
        let executor = Arc::new(QueueExecutor::default());
        let ctx = IotsContext {
            geometry: Arc::new(g),
            packet: Arc::new(IdlePacket),
            memory: Arc::new(SiotsPool::new(config.max_siots_per_iots)),
            executor: executor.clone(),
        };
        let op = BlockOperation::new(self.opcode, self.range.lba,
                                     self.range.blocks);
        let mut iots = Iots::new(ctx, op);
        let completions = Arc::new(Mutex::new(Vec::<IotsCompletion>::new()));

        let mut table = tabular::Table::new("{:>}  {:>}  {:>}  {:>}  {:<}");
        let mut hrow = tabular::Row::new();
        for h in ["PIECE", "LBA", "BLOCKS", "SIOTS", "STATUS"] {
            hrow.add_cell(h);
        }
        table.add_row(hrow);

        let mut piece = 0;
        let result = loop {
            iots.determine_next_blocks(config.chunk_size)?;
            let c2 = completions.clone();
            let mut status = iots.start(Box::new(move |c: IotsCompletion| {
                c2.lock().unwrap_or_else(PoisonError::into_inner).push(c);
            }));
            let mut nsiots = 0;
            while status != StateStatus::Done {
                let Some(r) = executor.pop() else { break };
                nsiots += 1;
                r.iots.siots_complete(r.id, BlockStatus::Success,
                                      BlockQualifier::None,
                                      PositionBitmask::EMPTY)?;
                status = iots.run();
            }
            let Some(c) = completions.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop()
            else {
                eprintln!("Error: piece {piece} never completed");
                break Err(Error::GenericFailure);
            };
            let mut row = tabular::Row::new();
            row.add_cell(piece);
            row.add_cell(c.lba);
            row.add_cell(c.blocks);
            row.add_cell(nsiots);
            row.add_cell(format!("{:?}", c.status));
            table.add_row(row);
            piece += 1;
            if c.status != BlockStatus::Success {
                break Err(Error::GenericFailure);
            }
            if c.request_complete {
                break Ok(());
            }
            iots.init_for_next_lba()?;
        };
        iots.destroy()?;
        print!("{table}");
        result.map_err(CliError::from)
    }
}

#[derive(Parser, Clone, Debug)]
enum SubCommand {
    Geometry(Geometry),
    StripeRange(StripeRange),
    LockRange(LockRange),
    ChunkRange(ChunkRange),
    Weight(Weight),
    Simulate(Simulate),
}

#[derive(Parser, Clone, Debug)]
#[clap(version = crate_version!())]
/// RAID geometry calculator
struct Cli {
    /// Library configuration file, in YAML
    #[clap(short, long)]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    cmd: SubCommand,
}

impl Cli {
    fn main(self) -> Result<()> {
        let config = match &self.config {
            Some(path) => LibraryConfig::load(path)?,
            None => LibraryConfig::default()
        };
        config.apply_global();
        match self.cmd {
            SubCommand::Geometry(geometry) => geometry.main(&config),
            SubCommand::StripeRange(sr) => sr.main(),
            SubCommand::LockRange(lr) => lr.main(&config),
            SubCommand::ChunkRange(cr) => cr.main(&config),
            SubCommand::Weight(weight) => weight.main(&config),
            SubCommand::Simulate(sim) => sim.main(&config),
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli: Cli = Cli::parse();
    if let Err(e) = cli.main() {
        eprintln!("Error: {e}");
        exit(e.errno());
    }
}
