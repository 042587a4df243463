//! CSV serialization of decoded tabular data.
//!
//! Output is UTF-8 with a leading byte-order marker so spreadsheet tools
//! pick the right encoding, one header row of channel names, and one row
//! per sample index. Channels shorter than the longest one yield empty
//! cells, and so do NaN float samples.

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Result;
use crate::tdms::Table;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

pub fn write_csv(table: &Table, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_table(table, &mut writer)?;
    writer.flush()?;
    Ok(())
}

pub fn write_table<W: Write>(table: &Table, writer: &mut W) -> Result<()> {
    writer.write_all(UTF8_BOM)?;

    let mut line = String::new();
    for (i, channel) in table.channels.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        line.push_str(&escape_field(&channel.path));
    }
    line.push('\n');
    writer.write_all(line.as_bytes())?;

    for row in 0..table.num_rows() {
        line.clear();
        for (i, channel) in table.channels.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            if let Some(cell) = channel.data.cell(row) {
                line.push_str(&escape_field(&cell));
            }
        }
        line.push('\n');
        writer.write_all(line.as_bytes())?;
    }
    Ok(())
}

/// RFC 4180 quoting: fields containing a comma, quote or line break are
/// wrapped in quotes, with embedded quotes doubled.
fn escape_field(field: &str) -> Cow<'_, str> {
    if field.contains(['"', ',', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tdms::{Channel, ChannelData};

    fn table(channels: Vec<(&str, ChannelData)>) -> Table {
        Table {
            channels: channels
                .into_iter()
                .map(|(path, data)| Channel {
                    path: path.to_string(),
                    data,
                    properties: Vec::new(),
                })
                .collect(),
        }
    }

    fn render(table: &Table) -> Vec<u8> {
        let mut out = Vec::new();
        write_table(table, &mut out).unwrap();
        out
    }

    #[test]
    fn starts_with_utf8_bom() {
        let out = render(&table(vec![("/'g'/'a'", ChannelData::F64(vec![1.0]))]));
        assert_eq!(&out[..3], UTF8_BOM);
    }

    #[test]
    fn header_and_rows_in_column_order() {
        let out = render(&table(vec![
            ("/'g'/'a'", ChannelData::I32(vec![1, 2])),
            ("/'g'/'b'", ChannelData::F64(vec![0.5, 1.5])),
        ]));
        let text = String::from_utf8(out[3..].to_vec()).unwrap();
        assert_eq!(text, "/'g'/'a',/'g'/'b'\n1,0.5\n2,1.5\n");
    }

    #[test]
    fn short_columns_pad_with_empty_cells() {
        let out = render(&table(vec![
            ("/'g'/'a'", ChannelData::I32(vec![1, 2, 3])),
            ("/'g'/'b'", ChannelData::I32(vec![9])),
        ]));
        let text = String::from_utf8(out[3..].to_vec()).unwrap();
        assert_eq!(text, "/'g'/'a',/'g'/'b'\n1,9\n2,\n3,\n");
    }

    #[test]
    fn nan_samples_render_as_empty_cells() {
        let out = render(&table(vec![
            ("/'g'/'a'", ChannelData::F64(vec![1.0, f64::NAN])),
            ("/'g'/'b'", ChannelData::F32(vec![f32::NAN, 2.0])),
        ]));
        let text = String::from_utf8(out[3..].to_vec()).unwrap();
        assert_eq!(text, "/'g'/'a',/'g'/'b'\n1,\n,2\n");
    }

    #[test]
    fn fields_with_commas_and_quotes_are_quoted() {
        let out = render(&table(vec![(
            "/'g'/'a,b'",
            ChannelData::String(vec!["say \"hi\"".to_string()]),
        )]));
        let text = String::from_utf8(out[3..].to_vec()).unwrap();
        assert_eq!(text, "\"/'g'/'a,b'\"\n\"say \"\"hi\"\"\"\n");
    }

    #[test]
    fn empty_table_is_just_the_header_line() {
        let out = render(&Table::default());
        assert_eq!(out, [UTF8_BOM, b"\n" as &[u8]].concat());
    }
}
