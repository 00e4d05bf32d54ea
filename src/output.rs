use std::io::Write;
use std::marker::PhantomData;
use std::path::PathBuf;

use csv_core::WriteResult;

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Table,
    Jsonl,
    Csv,
}

#[derive(clap::Parser)]
#[group(id = "output::Args")]
pub struct Args {
    /// Write to this file instead of the terminal.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    #[arg(long, short = 'f', value_enum, default_value_t = Format::Table)]
    format: Format,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not open the specified output file at {1:?}")]
    OpenOutputFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the output file at {1:?}")]
    WriteFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the terminal")]
    WriteStdout(#[source] std::io::Error),
    #[error("could not serialize a record to JSON")]
    SerializeJson(#[source] serde_json::Error),
}

/// One row of command output.
///
/// JSON lines use the `Serialize` impl; the table and CSV formats use `HEADERS` and `columns`.
pub trait Record: serde::Serialize {
    const HEADERS: &'static [&'static str];

    fn columns(&self) -> Vec<String>;
}

impl Args {
    /// Open the destination and write the header of `R` records.
    pub fn open<R: Record>(self) -> Result<Output<R>, Error> {
        let io: Box<dyn Write> = match &self.output {
            None => Box::new(std::io::stdout().lock()),
            Some(path) => Box::new(
                std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| Error::OpenOutputFile(e, path.clone()))?,
            ),
        };
        Output::new(io, self.format, self.output)
    }
}

enum Formatter {
    Table(comfy_table::Table),
    Jsonl,
    Csv,
}

/// A stream of `R` records in one of the output formats.
pub struct Output<R, W: Write = Box<dyn Write>> {
    io: W,
    path: Option<PathBuf>,
    formatter: Formatter,
    records: PhantomData<fn(&R)>,
}

impl<R: Record, W: Write> Output<R, W> {
    fn new(io: W, format: Format, path: Option<PathBuf>) -> Result<Self, Error> {
        let formatter = match format {
            Format::Table => {
                let mut comfy = comfy_table::Table::new();
                comfy.set_content_arrangement(comfy_table::ContentArrangement::Dynamic);
                comfy.set_header(R::HEADERS.to_vec());
                Formatter::Table(comfy)
            }
            Format::Jsonl => Formatter::Jsonl,
            Format::Csv => Formatter::Csv,
        };
        let mut output = Self { io, path, formatter, records: PhantomData };
        if let Formatter::Csv = output.formatter {
            output.write_line(&csv_line(R::HEADERS))?;
        }
        Ok(output)
    }

    pub fn write(&mut self, record: &R) -> Result<(), Error> {
        match &mut self.formatter {
            Formatter::Table(comfy) => {
                comfy.add_row(record.columns());
                Ok(())
            }
            Formatter::Csv => self.write_line(&csv_line(&record.columns())),
            Formatter::Jsonl => {
                let mut line = serde_json::to_vec(record).map_err(Error::SerializeJson)?;
                line.push(b'\n');
                self.write_line(&line)
            }
        }
    }

    /// Render the table, if any, and flush. Returns the underlying writer.
    pub fn finish(mut self) -> Result<W, Error> {
        if let Formatter::Table(comfy) = &self.formatter {
            let rendered = format!("{comfy}\n");
            self.write_line(rendered.as_bytes())?;
        }
        self.io.flush().map_err(|e| self.write_error(e))?;
        Ok(self.io)
    }

    fn write_line(&mut self, line: &[u8]) -> Result<(), Error> {
        self.io.write_all(line).map_err(|e| self.write_error(e))
    }

    fn write_error(&self, e: std::io::Error) -> Error {
        match &self.path {
            None => Error::WriteStdout(e),
            Some(p) => Error::WriteFile(e, p.clone()),
        }
    }
}

/// Encode one CSV line, quoting fields as needed.
fn csv_line<V: AsRef<str>>(fields: &[V]) -> Vec<u8> {
    let mut writer = csv_core::Writer::new();
    let mut buffer = [0; 256];
    let mut line = Vec::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            drain(&mut line, |out| writer.delimiter(out), &mut buffer);
        }
        let mut input = field.as_ref().as_bytes();
        loop {
            let (result, read, written) = writer.field(input, &mut buffer);
            line.extend_from_slice(&buffer[..written]);
            input = &input[read..];
            if matches!(result, WriteResult::InputEmpty) {
                break;
            }
        }
    }
    drain(&mut line, |out| writer.terminator(out), &mut buffer);
    line
}

fn drain(
    line: &mut Vec<u8>,
    mut step: impl FnMut(&mut [u8]) -> (WriteResult, usize),
    buffer: &mut [u8],
) {
    loop {
        let (result, written) = step(buffer);
        line.extend_from_slice(&buffer[..written]);
        if matches!(result, WriteResult::InputEmpty) {
            break;
        }
    }
}
