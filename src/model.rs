use anyhow::{anyhow, ensure, Result};
use log::warn;
use std::collections::HashMap;

use crate::points::PointRecord;

/// Contours with fewer points than this cannot enclose any area and are
/// pruned before the Z range is derived.
pub const MIN_CONTOUR_POINTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// A polyline of 3D points nominally lying within one Z slice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Contour {
    pub points: Vec<Point3>,
}

/// A labeled structure owning an ordered sequence of contours.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Object {
    pub contours: Vec<Contour>,
}

/// In-memory model as recovered from a flat point listing. The on-disk
/// model format stays opaque; conversion in and out goes through the
/// external point/model converters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Model {
    pub objects: Vec<Object>,
}

/// Derived slice coverage of the first object: first/last contour Z and
/// the full ordered per-contour Z list that drives the masking loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ZRange {
    pub zmin: i32,
    pub zmax: i32,
    pub zlist: Vec<i32>,
}

/// Most common integer Z among the given values, plus whether more than
/// one distinct value was present. Ties resolve to the smaller Z so the
/// choice is deterministic.
pub fn z_mode(zs: &[i32]) -> Option<(i32, bool)> {
    if zs.is_empty() {
        return None;
    }
    let mut counts: HashMap<i32, usize> = HashMap::new();
    for &z in zs {
        *counts.entry(z).or_insert(0) += 1;
    }
    let multiple = counts.len() > 1;
    let mode = counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(z, _)| z)?;
    Some((mode, multiple))
}

/// Returns the indices `i > 0` at which the ordered Z sequence jumps by
/// something other than +1.
pub fn z_gaps(zlist: &[i32]) -> Vec<usize> {
    zlist
        .windows(2)
        .enumerate()
        .filter(|(_, pair)| pair[1] != pair[0] + 1)
        .map(|(i, _)| i + 1)
        .collect()
}

impl Contour {
    /// Z value of the contour: the mode of its points' integer Z
    /// coordinates. A contour spanning several Z planes yields the most
    /// common value and a warning, never an error.
    pub fn z_value(&self) -> Option<i32> {
        let zs: Vec<i32> = self.points.iter().map(|p| p.z as i32).collect();
        let (mode, multiple) = z_mode(&zs)?;
        if multiple {
            warn!("Contour has more than one Z value. Selecting the most common Z value.");
        }
        Some(mode)
    }
}

impl Object {
    pub fn n_contours(&self) -> usize {
        self.contours.len()
    }

    /// Sorts contours into ascending Z order. Stable, so contours on the
    /// same slice keep their relative order.
    pub fn sort_contours(&mut self) {
        let mut keyed: Vec<(i32, Contour)> = self
            .contours
            .drain(..)
            .map(|c| (c.z_value().unwrap_or(i32::MIN), c))
            .collect();
        keyed.sort_by_key(|(z, _)| *z);
        self.contours = keyed.into_iter().map(|(_, c)| c).collect();
    }
}

impl Model {
    /// Rebuilds the object/contour structure from a point listing. The
    /// listing is expected to be grouped by object then contour, which
    /// is what the model-to-point converter emits.
    pub fn from_records(records: &[PointRecord]) -> Model {
        let mut objects: Vec<Object> = Vec::new();
        let mut current: Option<(usize, usize)> = None;

        for rec in records {
            let new_object = current.map_or(true, |(obj, _)| obj != rec.object);
            if new_object {
                objects.push(Object::default());
            }
            let new_contour = new_object || current.map_or(true, |(_, cont)| cont != rec.contour);
            if let Some(object) = objects.last_mut() {
                if new_contour {
                    object.contours.push(Contour::default());
                }
                if let Some(contour) = object.contours.last_mut() {
                    contour.points.push(Point3 {
                        x: rec.x,
                        y: rec.y,
                        z: rec.z,
                    });
                }
            }
            current = Some((rec.object, rec.contour));
        }

        Model { objects }
    }

    /// Flattens the model back into listing records, 1-based, contours
    /// numbered per object.
    pub fn to_records(&self) -> Vec<PointRecord> {
        let mut records = Vec::new();
        for (oi, object) in self.objects.iter().enumerate() {
            for (ci, contour) in object.contours.iter().enumerate() {
                for p in &contour.points {
                    records.push(PointRecord {
                        object: oi + 1,
                        contour: ci + 1,
                        x: p.x,
                        y: p.y,
                        z: p.z,
                    });
                }
            }
        }
        records
    }

    /// Drops contours below the triviality threshold from every object.
    pub fn remove_small_contours(&mut self) {
        for object in &mut self.objects {
            object
                .contours
                .retain(|c| c.points.len() >= MIN_CONTOUR_POINTS);
        }
    }

    /// Z coverage of the first object. Non-consecutive jumps between
    /// adjacent contours warn but never abort.
    pub fn derive_z_range(&self) -> Result<ZRange> {
        let object = self
            .objects
            .first()
            .ok_or_else(|| anyhow!("model contains no objects"))?;
        ensure!(
            !object.contours.is_empty(),
            "model contains no contours after pruning"
        );

        let mut zlist = Vec::with_capacity(object.contours.len());
        for (i, contour) in object.contours.iter().enumerate() {
            let z = contour
                .z_value()
                .ok_or_else(|| anyhow!("contour {} has no points", i + 1))?;
            log::debug!("Contour: {}, Z: {}", i + 1, z);
            zlist.push(z);
        }

        for gap in z_gaps(&zlist) {
            warn!(
                "Missing contour between Z = {} and Z = {}",
                zlist[gap - 1],
                zlist[gap]
            );
        }

        Ok(ZRange {
            zmin: zlist[0],
            zmax: zlist[zlist.len() - 1],
            zlist,
        })
    }

    /// Retains only objects with strictly more contours than `threshold`.
    pub fn filter_by_contour_count(&mut self, threshold: usize) {
        self.objects.retain(|o| o.contours.len() > threshold);
    }

    /// Folds every object past the first into object 1, preserving
    /// contour order.
    pub fn merge_objects(&mut self) {
        if self.objects.len() < 2 {
            return;
        }
        let extra: Vec<Object> = self.objects.drain(1..).collect();
        if let Some(first) = self.objects.first_mut() {
            for object in extra {
                first.contours.extend(object.contours);
            }
        }
    }

    pub fn n_objects(&self) -> usize {
        self.objects.len()
    }
}
