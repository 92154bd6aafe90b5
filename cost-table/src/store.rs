//! Persistence of cost table collections.
//!
//! Files are written next to their target and renamed over it once complete,
//! so a failed write never leaves a truncated table behind.

use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::PathBuf,
};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    CostTableError, Result,
    table::{CostTableCollection, TableBuilder},
};

const HEADER_POSITION: &str = "position";
const HEADER_IN_CHANNELS: &str = "in_channels";
const HEADER_OUT_CHANNELS: &str = "out_channels";
const HEADER_SECONDS: &str = "seconds";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
pub enum TableFormat {
    #[default]
    #[display("msgpack")]
    MessagePack,
    #[display("json")]
    Json,
    /// Long format, one `position,in_channels,out_channels,seconds` record per cell.
    #[display("csv")]
    Csv,
}

impl TableFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            TableFormat::MessagePack => "msgpack",
            TableFormat::Json => "json",
            TableFormat::Csv => "csv",
        }
    }
}

/// A directory holding cost table files of one format.
#[derive(Clone, Debug)]
pub struct TableStore {
    dir: PathBuf,
    format: TableFormat,
}

impl TableStore {
    pub fn new(dir: impl Into<PathBuf>, format: TableFormat) -> Self {
        Self {
            dir: dir.into(),
            format,
        }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{}", self.format.extension()))
    }

    /// Writes `collection` to `<dir>/<name>.<ext>`, replacing any previous file.
    pub fn save(&self, name: &str, collection: &CostTableCollection) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(CostTableError::Config(format!("invalid table name {name:?}")));
        }
        fs::create_dir_all(&self.dir)?;
        let target = self.path_for(name);
        let mut file = tempfile::Builder::new()
            .prefix(&format!(".{name}-"))
            .suffix(".tmp")
            .tempfile_in(&self.dir)?;
        {
            let mut writer = BufWriter::new(file.as_file_mut());
            self.encode(&mut writer, collection)?;
            writer.flush()?;
        }
        file.as_file().sync_all()?;
        file.persist(&target).map_err(|e| CostTableError::Io(e.error))?;
        info!(
            "saved {} cost table(s) to {}",
            collection.len(),
            target.display()
        );
        Ok(target)
    }

    pub fn load(&self, name: &str) -> Result<CostTableCollection> {
        let path = self.path_for(name);
        let reader = BufReader::new(File::open(&path)?);
        decode(self.format, reader)
    }

    fn encode<W: Write>(&self, writer: &mut W, collection: &CostTableCollection) -> Result<()> {
        match self.format {
            TableFormat::MessagePack => rmp_serde::encode::write_named(writer, collection)
                .map_err(|e| CostTableError::Serialization(e.to_string())),
            TableFormat::Json => serde_json::to_writer_pretty(writer, collection)
                .map_err(|e| CostTableError::Serialization(e.to_string())),
            TableFormat::Csv => write_csv(writer, collection)
                .map_err(|e| CostTableError::Serialization(e.to_string())),
        }
    }
}

fn write_csv<W: Write>(writer: W, collection: &CostTableCollection) -> csv::Result<()> {
    let mut csv = csv::WriterBuilder::new().from_writer(writer);
    csv.write_record([
        HEADER_POSITION,
        HEADER_IN_CHANNELS,
        HEADER_OUT_CHANNELS,
        HEADER_SECONDS,
    ])?;
    for (position, table) in collection.iter() {
        for (i, o, seconds) in table.cells() {
            csv.write_record([
                position.to_string(),
                i.to_string(),
                o.to_string(),
                seconds.to_string(),
            ])?;
        }
    }
    csv.flush()?;
    Ok(())
}

#[derive(Deserialize)]
struct CsvRecord {
    position: String,
    in_channels: usize,
    out_channels: usize,
    seconds: f64,
}

fn decode<R: std::io::Read>(format: TableFormat, reader: R) -> Result<CostTableCollection> {
    match format {
        TableFormat::MessagePack => {
            rmp_serde::from_read(reader).map_err(|e| CostTableError::Serialization(e.to_string()))
        }
        TableFormat::Json => {
            serde_json::from_reader(reader).map_err(|e| CostTableError::Serialization(e.to_string()))
        }
        TableFormat::Csv => read_csv(reader),
    }
}

fn read_csv<R: std::io::Read>(reader: R) -> Result<CostTableCollection> {
    let mut cells: BTreeMap<String, Vec<CsvRecord>> = BTreeMap::new();
    for record in csv::Reader::from_reader(reader).deserialize() {
        let record: CsvRecord = record.map_err(|e| CostTableError::Serialization(e.to_string()))?;
        cells.entry(record.position.clone()).or_default().push(record);
    }
    let mut collection = CostTableCollection::default();
    for (position, records) in cells {
        let rows = records.iter().map(|r| r.in_channels).max().unwrap_or(0);
        let cols = records.iter().map(|r| r.out_channels).max().unwrap_or(0);
        let mut builder = TableBuilder::new(rows, cols)?;
        for r in &records {
            builder.set(r.in_channels, r.out_channels, r.seconds)?;
        }
        collection.insert(position, builder.finish()?)?;
    }
    Ok(collection)
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    fn collection() -> anyhow::Result<CostTableCollection> {
        let mut collection = CostTableCollection::default();
        let mut conv = TableBuilder::new(2, 3)?;
        for i in 1..=2 {
            for o in 1..=3 {
                conv.set(i, o, 1e-4 * (i * o) as f64)?;
            }
        }
        collection.insert("Conv_0", conv.finish()?)?;
        let mut fc = TableBuilder::new(2, 10)?;
        fc.fill_row(1, 2.5e-5)?;
        fc.fill_row(2, 3.0e-5)?;
        collection.insert("FC", fc.finish()?)?;
        Ok(collection)
    }

    #[rstest]
    #[case(TableFormat::MessagePack)]
    #[case(TableFormat::Json)]
    #[case(TableFormat::Csv)]
    fn test_save_and_load(#[case] format: TableFormat) -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = TableStore::new(dir.path().join("perf_tables"), format);
        let collection = collection()?;
        let path = store.save("wrn", &collection)?;
        assert_eq!(path, store.path_for("wrn"));
        assert_eq!(store.load("wrn")?, collection);
        // only the target remains, no temporary files
        assert_eq!(fs::read_dir(dir.path().join("perf_tables"))?.count(), 1);
        Ok(())
    }

    #[test]
    fn test_csv_is_long_format() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = TableStore::new(dir.path(), TableFormat::Csv);
        let path = store.save("wrn", &collection()?)?;
        let text = fs::read_to_string(path)?;
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("position,in_channels,out_channels,seconds"));
        assert_eq!(lines.next(), Some("Conv_0,1,1,0.0001"));
        assert_eq!(text.lines().count(), 1 + 6 + 20);
        Ok(())
    }

    #[test]
    fn test_save_replaces_previous_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = TableStore::new(dir.path(), TableFormat::Json);
        store.save("wrn", &CostTableCollection::default())?;
        let collection = collection()?;
        store.save("wrn", &collection)?;
        assert_eq!(store.load("wrn")?, collection);
        Ok(())
    }

    #[test]
    fn test_invalid_name_writes_nothing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = TableStore::new(dir.path(), TableFormat::MessagePack);
        assert!(matches!(
            store.save("../escape", &collection()?),
            Err(CostTableError::Config(_))
        ));
        assert_eq!(fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }
}
