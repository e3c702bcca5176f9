use anyhow::{bail, Context, Result};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

/// One line of a flat point listing: `object contour x y z`.
///
/// This is the exchange format the point/model converters speak; object
/// and contour indices are 1-based and contours number per object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointRecord {
    pub object: usize,
    pub contour: usize,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Parses a whitespace-separated five-column point listing. Blank lines
/// are skipped; a malformed line is an error.
pub fn parse_listing(text: &str) -> Result<Vec<PointRecord>> {
    let mut records = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 {
            bail!(
                "point listing line {}: expected 5 columns, found {}",
                idx + 1,
                fields.len()
            );
        }
        records.push(PointRecord {
            object: fields[0]
                .parse()
                .with_context(|| format!("point listing line {}: bad object index", idx + 1))?,
            contour: fields[1]
                .parse()
                .with_context(|| format!("point listing line {}: bad contour index", idx + 1))?,
            x: fields[2]
                .parse()
                .with_context(|| format!("point listing line {}: bad x coordinate", idx + 1))?,
            y: fields[3]
                .parse()
                .with_context(|| format!("point listing line {}: bad y coordinate", idx + 1))?,
            z: fields[4]
                .parse()
                .with_context(|| format!("point listing line {}: bad z coordinate", idx + 1))?,
        });
    }
    Ok(records)
}

/// Number of contours a slice listing contributed: the contour index of
/// the last record (the listing numbers contours 1..n in order).
pub fn contour_count(records: &[PointRecord]) -> usize {
    records.last().map_or(0, |rec| rec.contour)
}

/// Renumbers slice-local records for the global accumulator: everything
/// lands in object 1 and contour indices are shifted past the contours
/// already emitted by earlier slices.
pub fn renumber(records: &[PointRecord], offset: usize) -> Vec<PointRecord> {
    records
        .iter()
        .map(|rec| PointRecord {
            object: 1,
            contour: rec.contour + offset,
            ..*rec
        })
        .collect()
}

pub fn format_records(records: &[PointRecord]) -> String {
    let mut out = String::new();
    for rec in records {
        out.push_str(&format!(
            "{} {} {} {} {}\n",
            rec.object, rec.contour, rec.x, rec.y, rec.z
        ));
    }
    out
}

/// Appends records to the running accumulator listing, creating it on
/// first use.
pub fn append_listing(path: &Path, records: &[PointRecord]) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening accumulator listing {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for rec in records {
        writeln!(
            writer,
            "{} {} {} {} {}",
            rec.object, rec.contour, rec.x, rec.y, rec.z
        )?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rec(object: usize, contour: usize, x: f64, y: f64, z: f64) -> PointRecord {
        PointRecord {
            object,
            contour,
            x,
            y,
            z,
        }
    }

    #[test]
    fn parses_five_column_lines() {
        let text = "1 1 10.5 20.25 3\n1 1 11.5 20.25 3\n1 2 5 5 4\n";
        let records = parse_listing(text).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].object, 1);
        assert_eq!(records[2].contour, 2);
        assert_relative_eq!(records[0].x, 10.5);
        assert_relative_eq!(records[1].y, 20.25);
    }

    #[test]
    fn skips_blank_lines() {
        let text = "\n1 1 0 0 0\n\n";
        assert_eq!(parse_listing(text).unwrap().len(), 1);
    }

    #[test]
    fn rejects_short_lines() {
        assert!(parse_listing("1 1 0 0\n").is_err());
        assert!(parse_listing("1 x 0 0 0\n").is_err());
    }

    #[test]
    fn contour_count_reads_last_record() {
        let records = vec![rec(1, 1, 0.0, 0.0, 0.0), rec(1, 3, 1.0, 1.0, 0.0)];
        assert_eq!(contour_count(&records), 3);
        assert_eq!(contour_count(&[]), 0);
    }

    #[test]
    fn renumber_offsets_contours_into_object_one() {
        let records = vec![
            rec(2, 1, 0.0, 0.0, 5.0),
            rec(2, 2, 1.0, 0.0, 5.0),
            rec(3, 1, 2.0, 0.0, 5.0),
        ];
        let shifted = renumber(&records, 7);
        assert!(shifted.iter().all(|r| r.object == 1));
        assert_eq!(shifted[0].contour, 8);
        assert_eq!(shifted[1].contour, 9);
        assert_eq!(shifted[2].contour, 8);
        // coordinates untouched
        assert_relative_eq!(shifted[2].x, 2.0);
        assert_relative_eq!(shifted[0].z, 5.0);
    }

    #[test]
    fn offset_fold_matches_sum_of_slice_counts() {
        // Three slices contributing 2, 0 and 3 contours: the running
        // offset after each append equals the cumulative sum, and every
        // written index lies in (offset, offset + ncont].
        let slices = vec![
            vec![rec(1, 1, 0.0, 0.0, 1.0), rec(1, 2, 1.0, 0.0, 1.0)],
            vec![],
            vec![
                rec(1, 1, 0.0, 0.0, 3.0),
                rec(1, 2, 1.0, 0.0, 3.0),
                rec(1, 3, 2.0, 0.0, 3.0),
            ],
        ];

        let mut offset = 0;
        let mut accumulated = Vec::new();
        for slice in &slices {
            if slice.is_empty() {
                continue;
            }
            let ncont = contour_count(slice);
            let shifted = renumber(slice, offset);
            assert!(shifted
                .iter()
                .all(|r| r.contour > offset && r.contour <= offset + ncont));
            accumulated.extend(shifted);
            offset += ncont;
        }

        assert_eq!(offset, 5);
        let indices: Vec<usize> = accumulated.iter().map(|r| r.contour).collect();
        assert_eq!(indices, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn format_and_parse_round_trip() {
        let records = vec![rec(1, 4, 12.5, 3.0, 9.0), rec(1, 5, 0.25, 0.75, 9.0)];
        let text = format_records(&records);
        assert_eq!(parse_listing(&text).unwrap(), records);
    }

    #[test]
    fn append_listing_accumulates_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        append_listing(&path, &[rec(1, 1, 0.0, 0.0, 1.0)]).unwrap();
        append_listing(&path, &[rec(1, 2, 1.0, 1.0, 2.0)]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "1 1 0 0 1\n1 2 1 1 2\n");
    }
}
