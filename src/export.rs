use std::io::Write;

use log::debug;

use crate::models::structs::{ColumnDescriptor, Record, Value};
use crate::query_ast::errors::Result;

/// Receives the result of a query. Either `open` gets the result's columns,
/// every record arrives in one or more `records` calls and `close` follows,
/// or nothing is called at all.
pub trait RecordWriter: Send {
    fn open(&mut self, fields: &[ColumnDescriptor]) -> Result<()>;

    fn records(&mut self, recs: &[Record]) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct RecordBuffer {
    pub fields: Vec<ColumnDescriptor>,
    pub records: Vec<Record>,
    pub closed: bool,
}

impl RecordBuffer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordWriter for RecordBuffer {
    fn open(&mut self, fields: &[ColumnDescriptor]) -> Result<()> {
        self.fields = fields.to_vec();
        Ok(())
    }

    fn records(&mut self, recs: &[Record]) -> Result<()> {
        self.records.extend_from_slice(recs);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Writes a header row of aliased column names on open, then one row per
/// record. NULL is an empty field, bytes are hex.
pub struct CsvRecordWriter<W: Write> {
    writer: csv::Writer<W>,
    wrote_header: bool,
    rows: usize,
}

impl<W: Write> CsvRecordWriter<W> {
    pub fn new(out: W) -> Self {
        Self { writer: csv::Writer::from_writer(out), wrote_header: false, rows: 0 }
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| std::io::Error::other(e.to_string()).into())
    }
}

impl<W: Write> CsvRecordWriter<W> {
    fn header(&mut self, fields: &[ColumnDescriptor]) -> Result<()> {
        if !self.wrote_header {
            self.writer.write_record(fields.iter().map(|f| f.aliased_name.as_str()))?;
            self.wrote_header = true;
        }
        Ok(())
    }
}

impl<W: Write + Send> RecordWriter for CsvRecordWriter<W> {
    fn open(&mut self, fields: &[ColumnDescriptor]) -> Result<()> {
        self.header(fields)
    }

    fn records(&mut self, recs: &[Record]) -> Result<()> {
        for rec in recs {
            self.header(&rec.fields)?;
            self.writer.write_record(rec.values.iter().map(Value::to_string))?;
            self.rows += 1;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.writer.flush()?;
        debug!("CSV writer: wrote {} rows", self.rows);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::ScanKind;
    use crate::models::structs::{QueryRows, column_descriptors};

    fn fields() -> Vec<ColumnDescriptor> {
        let names = vec!["uid".to_string(), "name".to_string(), "uid".to_string(), "pic".to_string()];
        let kinds = vec![ScanKind::Int, ScanKind::Text, ScanKind::Int, ScanKind::Bytes];
        column_descriptors(&names, &kinds)
    }

    fn sample() -> Vec<Record> {
        QueryRows {
            fields: fields(),
            rows: vec![
                vec![Value::Int(1), Value::Text("a, b".into()), Value::Int(1), Value::Bytes(vec![0xab, 0x01])],
                vec![Value::Int(2), Value::Null, Value::Null, Value::Null],
            ],
        }
        .into_records()
    }

    #[test]
    fn csv_output() {
        let mut w = CsvRecordWriter::new(Vec::new());
        w.open(&fields()).unwrap();
        w.records(&sample()).unwrap();
        w.close().unwrap();
        let out = String::from_utf8(w.into_inner().unwrap()).unwrap();
        assert_eq!(out, "uid,name,uid_1,pic\n1,\"a, b\",1,ab01\n2,,,\n");
    }

    #[test]
    fn empty_result_still_has_header() {
        let mut w = CsvRecordWriter::new(Vec::new());
        w.open(&fields()).unwrap();
        w.records(&[]).unwrap();
        w.close().unwrap();
        let out = String::from_utf8(w.into_inner().unwrap()).unwrap();
        assert_eq!(out, "uid,name,uid_1,pic\n");
    }

    #[test]
    fn buffer_collects() {
        let mut b = RecordBuffer::new();
        b.open(&fields()).unwrap();
        b.records(&sample()).unwrap();
        b.close().unwrap();
        assert_eq!(b.fields.len(), 4);
        assert_eq!(b.records.len(), 2);
        assert!(b.closed);
        assert_eq!(b.records[0].named_value("uid_1"), Some(&Value::Int(1)));
    }
}
