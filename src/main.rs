/*

Procedural mandala coloring pages: packed motifs or one large
pattern, optional color hints, rasterized and laid out on an A4 PDF.

 */

// bunch of standard library stuff
use std::path::{Path, PathBuf};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::collections::{HashMap, HashSet};
use std::collections::hash_map::Entry::{Occupied, Vacant};
extern crate cairo;

use log::{debug, error, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

//////////////////////////////////////////////////////////////////////
// use error chain so we can use Result<> everywhere
// for error handling

#[macro_use]
extern crate error_chain;

mod errors {

    error_chain!{

        foreign_links {
            Fmt(::std::fmt::Error);
            Io(::std::io::Error);
            Json(::serde_json::Error);
            Cairo(::cairo::Error);
            CairoBorrow(::cairo::BorrowError);
            Image(::image::ImageError);
        }

        errors {
            Generation(reason: String) {
                description("invalid generation parameters")
                display("generation failed: {}", reason)
            }
        }

    }

}

use errors::*;

//////////////////////////////////////////////////////////////////////
// define some statically allocated maps for
// lookups of settings strings

use phf::phf_map;

//////////////////////////////////////////////////////////////////////
// math constants

const PI: f64 = std::f64::consts::PI;
const TAU: f64 = 2.0 * PI;

//////////////////////////////////////////////////////////////////////
// constants for the free-form canvas and its packing

const CANVAS_HALF_WIDTH: f64 = 0.97;
const CANVAS_HALF_HEIGHT: f64 = 1.35;

const MIN_MOTIFS: usize = 14;
const MAX_MOTIFS: usize = 21;

const RADIUS_BAND: (f64, f64) = (0.34, 0.68);
const TOPUP_RADIUS_BAND: (f64, f64) = (0.28, 0.38);

const OVERLAP_START: f64 = 0.33;
const OVERLAP_STEP: f64 = 0.01;
const OVERLAP_CEILING: f64 = 0.48;
const TOPUP_OVERLAP_FACTOR: f64 = 0.8;

const MAX_PRIMARY_TRIES: usize = 4000;
const MAX_TOTAL_TRIES: usize = 8000;

//////////////////////////////////////////////////////////////////////
// constants for rasterizing (line widths and fonts are in points)

const PIXELS_PER_UNIT: f64 = 560.0;
const MAX_IMAGE_SIDE: f64 = 4096.0;
const PX_PER_POINT: f64 = 150.0 / 72.0;
const IMAGE_PAD_PX: f64 = 48.0;

//////////////////////////////////////////////////////////////////////
// constants for page layout, in PDF points

const INCH: f64 = 72.0;
const CM: f64 = INCH / 2.54;

const A4_WIDTH: f64 = 21.0 * CM;
const A4_HEIGHT: f64 = 29.7 * CM;

const MARGIN: f64 = 1.5 * CM;

const IMAGE_BOX_WIDTH: f64 = 18.0 * CM;
const IMAGE_BOX_HEIGHT: f64 = 25.0 * CM;

const LEGEND_COLUMNS: usize = 5;
const LEGEND_ROW_HEIGHT: f64 = 16.0;
const LEGEND_FONT_SIZE: f64 = 9.0;
const LEGEND_GAP: f64 = 12.0;

//////////////////////////////////////////////////////////////////////
// files and directories, relative to the working directory

const CONFIG_FILE: &str = "config.json";
const OUTPUT_DIR: &str = "output";
const TMP_DIR: &str = "tmp";
const MANDALA_IMAGE: &str = "mandala.png";

//////////////////////////////////////////////////////////////////////
// color names for hints

const BASIC_COLORS: [&str; 11] = [
    "Red", "Blue", "Yellow", "Green", "Orange", "Purple",
    "Pink", "Brown", "Black", "White", "Gray"
];

const ADVANCED_COLORS: [&str; 31] = [
    "Crimson", "Indigo", "Turquoise", "Gold", "Silver", "Teal", "Violet",
    "Magenta", "Lime", "Coral", "Azure", "Tan", "Olive", "Lavender",
    "Peach", "Mint", "Navy", "Cyan", "Beige", "Chocolate", "Mustard",
    "Amber", "Emerald", "Rose", "Salmon", "Ruby", "Sapphire", "Ivory",
    "Platinum", "Brass", "Copper"
];

//////////////////////////////////////////////////////////////////////
// pull in some types from nalgebra

type Vec2d = nalgebra::Vector2<f64>;
type Point2d = nalgebra::geometry::Point2<f64>;
type Translation2d = nalgebra::Translation2<f64>;
type Transform2d = nalgebra::Transform2<f64>;
type Matrix3d = nalgebra::Matrix3<f64>;

//////////////////////////////////////////////////////////////////////
// Rect2d type has lower-left p0 and upper-right p1

#[derive(Debug, Clone, PartialEq)]
struct Rect2d {

    p0: Point2d,
    p1: Point2d

}

impl Rect2d {

    // empty rectangle has p0 > p1
    fn empty() -> Self {

        let p0 = Point2d::new(f64::MAX, f64::MAX);
        let p1 = -p0;

        Rect2d { p0: p0, p1: p1 }

    }

    // new rect from points
    fn new(p0: Point2d, p1: Point2d) -> Self {
        Rect2d { p0: p0, p1: p1 }
    }

    fn is_empty(&self) -> bool {
        self.p0.x > self.p1.x || self.p0.y > self.p1.y
    }

    // expand this rect to include the given point
    fn expand(&mut self, p: &Point2d) {
        self.p0 = self.p0.inf(p);
        self.p1 = self.p1.sup(p);
    }

    // expand this rect to include another one
    fn union(&mut self, other: &Rect2d) {
        if !other.is_empty() {
            self.expand(&other.p0);
            self.expand(&other.p1);
        }
    }

    // grow (or shrink, if negative) by margin on every side
    fn inflated(&self, margin: f64) -> Rect2d {
        let m = Vec2d::repeat(margin);
        Rect2d::new(self.p0 - m, self.p1 + m)
    }

    // dimensions of this rect
    fn dims(&self) -> Vec2d {
        self.p1 - self.p0
    }

    // center of this rect
    fn center(&self) -> Point2d {
        self.p0 + 0.5*(self.p1 - self.p0)
    }

    // is p strictly inside this rect shrunk by inset?
    fn strictly_contains(&self, p: &Point2d, inset: f64) -> bool {
        self.p0.x + inset < p.x && p.x < self.p1.x - inset &&
            self.p0.y + inset < p.y && p.y < self.p1.y - inset
    }

}

//////////////////////////////////////////////////////////////////////
//
// make a Transform2d that will translate and scale the given
// contents_rect (input) to the given page_rect (output).
//
// always includes vertical flip because graphics coordinate system
// is left-handed (y increases going down)
//

fn get_page_transform(contents_rect: &Rect2d,
                      page_rect: &Rect2d) -> (Transform2d, f64) {

    let cdims = contents_rect.dims();
    let pdims = page_rect.dims();

    let scl = (pdims.component_div(&cdims)).min();

    let vmid = contents_rect.center();
    let pmid = page_rect.center();

    let translate_page = Translation2d::new(pmid[0], pmid[1]);

    let scale = Transform2d::from_matrix_unchecked(
        Matrix3d::new(
            scl, 0.0, 0.0,
            0.0, -scl, 0.0,
            0.0, 0.0, 1.0
        )
    );

    let translate_points = Translation2d::new(-vmid[0], -vmid[1]);

    let transform = translate_page * scale * translate_points;

    (transform, scl)

}

//////////////////////////////////////////////////////////////////////
// parameter checks shared by geometry and motifs

fn check_radius(what: &str, r: f64) -> Result<()> {

    if !(r.is_finite() && r > 0.0) {
        bail!(ErrorKind::Generation(
            format!("{:} must be positive and finite, got {:}", what, r)));
    }

    Ok(())

}

fn check_line_width(lw: f64) -> Result<()> {

    if !(lw.is_finite() && lw > 0.0) {
        bail!(ErrorKind::Generation(
            format!("line width must be positive, got {:}", lw)));
    }

    Ok(())

}

//////////////////////////////////////////////////////////////////////
// geometry primitives

// point at given distance and angle from center
fn polar(center: &Point2d, radius: f64, angle: f64) -> Point2d {
    center + Vec2d::new(angle.cos(), angle.sin()) * radius
}

// n angles evenly spaced around the circle, starting at offset
fn even_angles(n: usize, offset: f64) -> Vec<f64> {
    (0..n).map(|i| offset + TAU * (i as f64) / (n as f64)).collect()
}

// n samples from lo to hi inclusive; a single sample sits at lo
fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {

    match n {
        0 => vec![],
        1 => vec![lo],
        _ => {
            let step = (hi - lo) / ((n - 1) as f64);
            (0..n).map(|i| lo + step * (i as f64)).collect()
        }
    }

}

fn regular_polygon(center: &Point2d,
                   radius: f64,
                   n_sides: usize,
                   rotation: f64) -> Result<Vec<Point2d>> {

    check_radius("polygon radius", radius)?;

    if n_sides < 3 {
        bail!(ErrorKind::Generation(
            format!("a polygon needs at least 3 sides, got {:}", n_sides)));
    }

    Ok(even_angles(n_sides, rotation).iter()
       .map(|&t| polar(center, radius, t))
       .collect())

}

// vertices alternate between outer and inner radius every PI/n_points
fn star_polygon(center: &Point2d,
                outer_radius: f64,
                inner_radius: f64,
                n_points: usize,
                rotation: f64) -> Result<Vec<Point2d>> {

    check_radius("star outer radius", outer_radius)?;
    check_radius("star inner radius", inner_radius)?;

    if inner_radius >= outer_radius {
        bail!(ErrorKind::Generation(
            format!("star inner radius {:} must be below outer radius {:}",
                    inner_radius, outer_radius)));
    }

    if n_points < 2 {
        bail!(ErrorKind::Generation(
            format!("a star needs at least 2 points, got {:}", n_points)));
    }

    let step = PI / (n_points as f64);

    Ok((0..2*n_points).map(|i| {
        let r = if i % 2 == 0 { outer_radius } else { inner_radius };
        polar(center, r, rotation + step * (i as f64))
    }).collect())

}

fn centroid(points: &[Point2d]) -> Result<Point2d> {

    if points.is_empty() {
        bail!(ErrorKind::Generation("centroid of an empty point set".to_string()));
    }

    let sum = points.iter().fold(Vec2d::zeros(), |acc, p| acc + p.coords);

    Ok(Point2d::from(sum / (points.len() as f64)))

}

// even-odd ray casting toward +x. horizontal edges are skipped: a
// horizontal ray can only run along them, never cross them.
fn point_in_polygon(p: &Point2d, polygon: &[Point2d]) -> bool {

    let n = polygon.len();

    if n < 3 {
        return false;
    }

    let mut inside = false;

    for (idx, a) in polygon.iter().enumerate() {

        let b = &polygon[(idx + 1) % n];

        if a.y == b.y {
            continue;
        }

        if p.y > a.y.min(b.y) && p.y <= a.y.max(b.y) {

            let xint = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);

            if p.x <= xint {
                inside = !inside;
            }

        }

    }

    inside

}

//////////////////////////////////////////////////////////////////////
// source of random draws; anything implementing rand::Rng works,
// tests hand in seeded or constant generators

trait RandomSource {

    // uniform in [lo, hi); returns lo for an empty range
    fn uniform(&mut self, lo: f64, hi: f64) -> f64;

    // uniform integer in [lo, hi] inclusive
    fn int(&mut self, lo: usize, hi: usize) -> usize;

    fn choice<'a, T>(&mut self, items: &'a [T]) -> Result<&'a T> {
        if items.is_empty() {
            bail!(ErrorKind::Generation("choice from an empty list".to_string()));
        }
        Ok(&items[self.int(0, items.len() - 1)])
    }

    fn chance(&mut self, p: f64) -> bool {
        self.uniform(0.0, 1.0) < p
    }

}

impl<R: Rng + ?Sized> RandomSource for R {

    fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        if hi > lo { self.gen_range(lo..hi) } else { lo }
    }

    fn int(&mut self, lo: usize, hi: usize) -> usize {
        if hi > lo { self.gen_range(lo..=hi) } else { lo }
    }

}

//////////////////////////////////////////////////////////////////////
// label allocator: color name -> small positive integer, stable for
// one generation run

// smallest positive integer not in used
fn next_unused_number(used: &HashSet<usize>) -> usize {

    let mut n = 1;

    while used.contains(&n) {
        n += 1;
    }

    n

}

// (number, color name) pairs sorted by number
type Legend = Vec<(usize, String)>;

#[derive(Debug, Default)]
struct LabelAllocator {
    numbers: HashMap<String, usize>, // color name -> number
    used:    HashSet<usize>          // every number handed out so far
}

impl LabelAllocator {

    // number for name, assigned on first use and cached after that
    fn number_for(&mut self, name: &str) -> usize {

        match self.numbers.entry(name.to_string()) {
            Occupied(entry) => *entry.get(),
            Vacant(entry) => {
                let n = next_unused_number(&self.used);
                self.used.insert(n);
                *entry.insert(n)
            }
        }

    }

    fn len(&self) -> usize {
        self.numbers.len()
    }

    fn legend(&self) -> Option<Legend> {

        if self.numbers.is_empty() {
            return None;
        }

        let mut legend: Legend = self.numbers.iter()
            .map(|(name, &n)| (n, name.clone()))
            .collect();

        legend.sort();

        Some(legend)

    }

}

//////////////////////////////////////////////////////////////////////
// generation configuration

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum HintMode {
    None,   // no hints at all
    Name,   // write the color name
    Number  // write a number resolved via the legend
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Palette {
    Basic,
    Advanced
}

impl Palette {

    fn names(self) -> &'static [&'static str] {
        match self {
            Palette::Basic => &BASIC_COLORS,
            Palette::Advanced => &ADVANCED_COLORS
        }
    }

}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum CompositionStyle {
    FreeForm,       // many packed motifs
    GeometricRings, // one large ring pattern
    EasyStructured  // one large structured pattern
}

#[derive(Debug, Clone, PartialEq)]
struct GenerationConfig {
    hint_mode:  HintMode,
    palette:    Palette,
    style:      CompositionStyle,
    max_radius: f64 // only used by the single-pattern styles
}

impl Default for GenerationConfig {
    fn default() -> Self {
        GenerationConfig {
            hint_mode: HintMode::None,
            palette: Palette::Basic,
            style: CompositionStyle::FreeForm,
            max_radius: 1.35
        }
    }
}

//////////////////////////////////////////////////////////////////////
// per-run hinting state handed to every motif

struct Hints {
    mode:    HintMode,
    palette: Option<&'static [&'static str]>, // None disables hints
    labels:  LabelAllocator
}

impl Hints {

    fn new(mode: HintMode, palette: Palette) -> Self {

        let palette = match mode {
            HintMode::None => None,
            _ => Some(palette.names())
        };

        Hints { mode: mode, palette: palette, labels: LabelAllocator::default() }

    }

    fn active(&self) -> bool {
        self.palette.is_some() && self.mode != HintMode::None
    }

    // draw a color for one anchor and render it per the hint mode
    fn next_text<R: RandomSource>(&mut self, rng: &mut R) -> Option<String> {

        let palette = self.palette?;

        let name: &str = rng.choice(palette).ok()?;

        match self.mode {
            HintMode::None => None,
            HintMode::Name => Some(name.to_string()),
            HintMode::Number => Some(format!("{:}", self.labels.number_for(name)))
        }

    }

    fn legend(&self) -> Option<Legend> {
        match self.mode {
            HintMode::Number => self.labels.legend(),
            _ => None
        }
    }

}

//////////////////////////////////////////////////////////////////////
// drawable shapes, stroke only

#[derive(Debug, Clone, PartialEq)]
enum Outline {
    Circle { center: Point2d, radius: f64 },
    Ellipse { center: Point2d, width: f64, height: f64, angle: f64 },
    Polygon(Vec<Point2d>),  // closed
    Polyline(Vec<Point2d>)  // open
}

#[derive(Debug, Clone, PartialEq)]
struct Shape {
    outline:    Outline,
    line_width: f64 // points
}

impl Shape {

    fn bounds(&self) -> Rect2d {

        let mut rect = Rect2d::empty();

        match &self.outline {

            Outline::Circle { center, radius } => {
                let h = Vec2d::repeat(*radius);
                rect.expand(&(*center - h));
                rect.expand(&(*center + h));
            }

            Outline::Ellipse { center, width, height, angle } => {
                let (a, b) = (0.5 * width, 0.5 * height);
                let (s, c) = angle.sin_cos();
                let h = Vec2d::new((a*c).hypot(b*s), (a*s).hypot(b*c));
                rect.expand(&(*center - h));
                rect.expand(&(*center + h));
            }

            Outline::Polygon(points) | Outline::Polyline(points) => {
                for p in points {
                    rect.expand(p);
                }
            }

        }

        rect

    }

}

// hint text centered on an anchor
#[derive(Debug, Clone, PartialEq)]
struct Annotation {
    pos:       Point2d,
    text:      String,
    font_size: f64, // points
    rotation:  f64, // radians, counterclockwise
    halo:      f64  // width of white outline, points
}

// everything one generation call draws; view, when set, is the crop
// window requested by the motif
#[derive(Debug, Default)]
struct Artwork {
    shapes:      Vec<Shape>,
    annotations: Vec<Annotation>,
    view:        Option<Rect2d>
}

impl Artwork {

    fn push(&mut self, outline: Outline, lw: f64) -> Result<()> {
        check_line_width(lw)?;
        self.shapes.push(Shape { outline: outline, line_width: lw });
        Ok(())
    }

    fn circle(&mut self, center: Point2d, radius: f64, lw: f64) -> Result<()> {
        check_radius("circle radius", radius)?;
        self.push(Outline::Circle { center: center, radius: radius }, lw)
    }

    fn ellipse(&mut self, center: Point2d,
               width: f64, height: f64, angle: f64,
               lw: f64) -> Result<()> {
        check_radius("ellipse width", width)?;
        check_radius("ellipse height", height)?;
        self.push(Outline::Ellipse { center: center, width: width,
                                     height: height, angle: angle }, lw)
    }

    fn polygon(&mut self, points: Vec<Point2d>, lw: f64) -> Result<()> {
        self.push(Outline::Polygon(points), lw)
    }

    fn polyline(&mut self, points: Vec<Point2d>, lw: f64) -> Result<()> {
        self.push(Outline::Polyline(points), lw)
    }

    fn line(&mut self, a: Point2d, b: Point2d, lw: f64) -> Result<()> {
        self.polyline(vec![a, b], lw)
    }

    // add a hint at pos if hinting is on
    fn annotate<R: RandomSource>(&mut self,
                                 hints: &mut Hints,
                                 rng: &mut R,
                                 pos: Point2d,
                                 font_size: f64,
                                 rotation: f64,
                                 halo: f64) {

        if let Some(text) = hints.next_text(rng) {
            self.annotations.push(Annotation {
                pos: pos,
                text: text,
                font_size: font_size,
                rotation: rotation,
                halo: halo
            });
        }

    }

    fn extend(&mut self, other: Artwork) {

        self.shapes.extend(other.shapes);
        self.annotations.extend(other.annotations);

        self.view = match (self.view.take(), other.view) {
            (Some(mut a), Some(b)) => { a.union(&b); Some(a) }
            (a, b) => a.or(b)
        };

    }

    // extent of every shape and annotation anchor
    fn bounds(&self) -> Rect2d {

        let mut rect = Rect2d::empty();

        for shape in &self.shapes {
            rect.union(&shape.bounds());
        }

        for note in &self.annotations {
            rect.expand(&note.pos);
        }

        rect

    }

}

//////////////////////////////////////////////////////////////////////
// motif kinds and their randomly chosen parameters

const PETAL_COUNTS: [usize; 7] = [10, 12, 14, 16, 18, 20, 24];
const RAY_COUNTS: [usize; 4] = [20, 24, 28, 32];
const RING_COUNTS: [usize; 7] = [8, 10, 12, 14, 16, 18, 20];
const RIM_COUNTS: [usize; 4] = [16, 20, 24, 28];

const SPIRAL_SAMPLES: usize = 120;
const CURL_SAMPLES: usize = 60;

// fixed relative radii of the optional guide circles of the easy motif
const GUIDE_RADII: [f64; 3] = [0.42, 0.72, 1.0];
const GUIDE_PROBABILITY: f64 = 0.7;
const RIM_CIRCLE_PROBABILITY: f64 = 0.8;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum RingShape {
    Polygon,  // arc of the ring closed into a polygon
    Petal,    // ellipse along the ring
    Triangle  // apex on the ring, base inside it
}

const RING_SHAPES: [RingShape; 3] = [
    RingShape::Polygon,
    RingShape::Petal,
    RingShape::Triangle
];

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
struct RingLevel {
    shape: RingShape,
    count: usize
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum CenterOrnament {
    Polygon { sides: usize },
    NestedPolygons { sides: usize },
    StarTriangle { points: usize },
    TriangleRing { count: usize },
    PolygonCircles
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum MiddleRing {
    Petals,
    Ovals,
    Triangles,
    LayeredPetals
}

const MIDDLE_RINGS: [MiddleRing; 4] = [
    MiddleRing::Petals,
    MiddleRing::Ovals,
    MiddleRing::Triangles,
    MiddleRing::LayeredPetals
];

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum RimElement {
    Circle,
    Square,
    Triangle
}

// every random structural choice of the easy motif
#[derive(Debug, Clone, PartialEq)]
struct EasyLayout {
    ornament:   CenterOrnament,
    sectors:    usize,           // sides of the inner polygon
    rotation:   f64,             // of the inner polygon
    ring:       MiddleRing,
    ring_count: usize,
    rim:        Vec<RimElement>, // one per rim position
    guides:     Vec<f64>         // relative radii of included guide circles
}

impl EasyLayout {

    fn random<R: RandomSource>(rng: &mut R) -> Result<Self> {

        let ornament = match rng.int(0, 4) {
            0 => CenterOrnament::Polygon { sides: rng.int(5, 8) },
            1 => CenterOrnament::NestedPolygons { sides: rng.int(5, 8) },
            2 => CenterOrnament::StarTriangle { points: rng.int(5, 8) },
            3 => CenterOrnament::TriangleRing { count: rng.int(6, 10) },
            _ => CenterOrnament::PolygonCircles
        };

        let sectors = rng.int(6, 10);
        let rotation = rng.uniform(0.0, TAU / (sectors as f64));

        let ring = *rng.choice(&MIDDLE_RINGS)?;
        let ring_count = rng.int(12, 20);

        let rim_count = *rng.choice(&RIM_COUNTS)?;

        let rim = (0..rim_count).map(|_| {
            if rng.chance(RIM_CIRCLE_PROBABILITY) {
                RimElement::Circle
            } else if rng.chance(0.5) {
                RimElement::Square
            } else {
                RimElement::Triangle
            }
        }).collect();

        let guides = GUIDE_RADII.iter()
            .copied()
            .filter(|_| rng.chance(GUIDE_PROBABILITY))
            .collect();

        Ok(EasyLayout {
            ornament: ornament,
            sectors: sectors,
            rotation: rotation,
            ring: ring,
            ring_count: ring_count,
            rim: rim,
            guides: guides
        })

    }

}

#[derive(Debug, Clone, PartialEq)]
enum Motif {
    Flower { petals: usize },
    Spiral { turns: usize },
    Leaf { leaves: usize },
    RayBurst { rays: usize },
    GeometricRings(Vec<RingLevel>),
    EasyStructured(EasyLayout)
}

impl Motif {

    // one of the four kinds used by the free-form style
    fn random_free_form<R: RandomSource>(rng: &mut R) -> Result<Self> {
        Ok(match rng.int(0, 3) {
            0 => Motif::Flower { petals: *rng.choice(&PETAL_COUNTS)? },
            1 => Motif::Spiral { turns: rng.int(4, 8) },
            2 => Motif::Leaf { leaves: rng.int(3, 5) },
            _ => Motif::RayBurst { rays: *rng.choice(&RAY_COUNTS)? }
        })
    }

    fn random_geometric<R: RandomSource>(rng: &mut R) -> Result<Self> {

        let n_levels = rng.int(4, 6);
        let mut levels = Vec::with_capacity(n_levels);

        for _ in 0..n_levels {
            levels.push(RingLevel {
                shape: *rng.choice(&RING_SHAPES)?,
                count: *rng.choice(&RING_COUNTS)?
            });
        }

        Ok(Motif::GeometricRings(levels))

    }

    fn random_easy<R: RandomSource>(rng: &mut R) -> Result<Self> {
        Ok(Motif::EasyStructured(EasyLayout::random(rng)?))
    }

    // emit shapes (and hints, if enabled) for a motif of outer radius r
    fn synthesize<R: RandomSource>(&self,
                                   center: &Point2d,
                                   r: f64,
                                   lw: f64,
                                   hints: &mut Hints,
                                   rng: &mut R) -> Result<Artwork> {

        check_radius("motif radius", r)?;
        check_line_width(lw)?;

        match self {
            Motif::Flower { petals } => draw_flower(center, r, lw, *petals, hints, rng),
            Motif::Spiral { turns } => draw_spiral(center, r, lw, *turns, hints, rng),
            Motif::Leaf { leaves } => draw_leaf(center, r, lw, *leaves, hints, rng),
            Motif::RayBurst { rays } => draw_ray_burst(center, r, lw, *rays, hints, rng),
            Motif::GeometricRings(levels) => draw_geometric_rings(center, r, lw, levels, hints, rng),
            Motif::EasyStructured(layout) => draw_easy(center, r, lw, layout, hints, rng)
        }

    }

}

//////////////////////////////////////////////////////////////////////
// free-form motifs

fn draw_flower<R: RandomSource>(center: &Point2d,
                                r: f64,
                                lw: f64,
                                petals: usize,
                                hints: &mut Hints,
                                rng: &mut R) -> Result<Artwork> {

    let mut art = Artwork::default();

    art.circle(*center, 0.18 * r, lw)?;

    for f in linspace(0.4, 1.0, 3) {
        art.circle(*center, f * r, lw)?;
    }

    let angles = even_angles(petals, 0.0);

    for &t in &angles {
        let width = r * rng.uniform(0.42, 0.65);
        let height = r * rng.uniform(0.15, 0.22);
        art.ellipse(polar(center, 0.6 * r, t), width, height, t, lw)?;
    }

    art.annotate(hints, rng, *center, (13.0 * r).max(9.0), 0.0, 1.5);

    for &t in &angles {
        art.annotate(hints, rng, polar(center, 0.6 * r, t),
                     (8.0 * r).max(9.0), 0.0, 1.5);
    }

    Ok(art)

}

// archimedean-style spiral a + b*theta/2pi sampled over the given turns
fn draw_spiral<R: RandomSource>(center: &Point2d,
                                r: f64,
                                lw: f64,
                                turns: usize,
                                hints: &mut Hints,
                                rng: &mut R) -> Result<Artwork> {

    let mut art = Artwork::default();

    let a = 0.18 * r;
    let b = 0.13 * r;

    let path: Vec<Point2d> = linspace(0.0, (turns as f64) * TAU, SPIRAL_SAMPLES)
        .iter()
        .map(|&theta| polar(center, a + b * theta / TAU, theta))
        .collect();

    art.polyline(path.clone(), lw)?;

    for f in linspace(0.4, 1.0, 3) {
        art.circle(*center, f * r, lw)?;
    }

    if hints.active() {

        let n_colors = rng.int(1, 3);

        for s in linspace(0.15, 0.85, n_colors) {
            let idx = ((s * path.len() as f64) as usize).min(path.len() - 1);
            art.annotate(hints, rng, path[idx], (11.0 * r).max(9.0), 0.0, 1.3);
        }

    }

    Ok(art)

}

fn draw_leaf<R: RandomSource>(center: &Point2d,
                              r: f64,
                              lw: f64,
                              leaves: usize,
                              hints: &mut Hints,
                              rng: &mut R) -> Result<Artwork> {

    let mut art = Artwork::default();

    for t in even_angles(leaves, 0.0) {

        let leaf_center = polar(center, 0.45 * r, t);
        let width = r * rng.uniform(0.22, 0.32);
        let height = r * rng.uniform(0.33, 0.48);

        art.ellipse(leaf_center, width, height, t + 0.5 * PI, lw)?;
        art.line(*center, leaf_center, 0.5 * lw)?;

        art.annotate(hints, rng, leaf_center, (12.0 * height).max(8.0), t, 1.0);

    }

    art.circle(*center, 0.13 * r, lw)?;
    art.annotate(hints, rng, *center, (9.0 * r).max(7.0), 0.0, 1.2);

    Ok(art)

}

fn draw_ray_burst<R: RandomSource>(center: &Point2d,
                                   r: f64,
                                   lw: f64,
                                   rays: usize,
                                   hints: &mut Hints,
                                   rng: &mut R) -> Result<Artwork> {

    let mut art = Artwork::default();

    for t in even_angles(rays, 0.0) {

        let p0 = polar(center, 0.22 * r, t);
        let p1 = polar(center, 0.95 * r, t);

        art.line(p0, p1, 0.7 * lw)?;

        // small curl at the inner end of the ray
        let curl = linspace(0.0, TAU, CURL_SAMPLES).iter()
            .map(|&theta| polar(&p0, 0.08 * r + 0.05 * r * theta / TAU, theta + t))
            .collect();

        art.polyline(curl, 0.5 * lw)?;

    }

    for f in linspace(0.33, 1.0, 4) {
        art.circle(*center, f * r, lw)?;
    }

    if hints.active() {

        art.annotate(hints, rng, *center, (15.0 * r).max(11.0), 0.0, 1.5);

        let n_rim = rng.int(1, 5);

        for base in even_angles(n_rim, 0.0) {
            let ang = base + rng.uniform(-0.25, 0.25);
            let pos = center + Vec2d::new(0.85 * r * ang.cos(), 1.10 * r * ang.sin());
            art.annotate(hints, rng, pos, (10.0 * r).max(8.0), 0.0, 1.3);
        }

    }

    Ok(art)

}

//////////////////////////////////////////////////////////////////////
// one large pattern of concentric levels; crops its own view

enum RingRegion {
    Polygon(Vec<Point2d>),
    Petal(Point2d, f64)
}

fn draw_geometric_rings<R: RandomSource>(center: &Point2d,
                                         r_max: f64,
                                         lw: f64,
                                         levels: &[RingLevel],
                                         hints: &mut Hints,
                                         rng: &mut R) -> Result<Artwork> {

    if levels.is_empty() {
        bail!(ErrorKind::Generation("geometric pattern without levels".to_string()));
    }

    let mut art = Artwork::default();
    let mut regions = Vec::new();
    let mut extent = Rect2d::empty();

    let n_levels = levels.len() as f64;

    for (idx, level) in levels.iter().enumerate() {

        let radius = r_max * ((idx + 1) as f64) / n_levels;
        let n = level.count as f64;

        for ang in even_angles(level.count, 0.0) {

            match level.shape {

                RingShape::Polygon => {
                    let points: Vec<Point2d> = (0..5)
                        .map(|k| polar(center, radius, ang + TAU * (k as f64) / n))
                        .collect();
                    points.iter().for_each(|p| extent.expand(p));
                    art.polygon(points.clone(), lw)?;
                    regions.push(RingRegion::Polygon(points));
                }

                RingShape::Triangle => {
                    let points = vec![
                        polar(center, radius, ang),
                        polar(center, 0.87 * radius, ang + PI / n),
                        polar(center, 0.87 * radius, ang - PI / n)
                    ];
                    points.iter().for_each(|p| extent.expand(p));
                    art.polygon(points.clone(), lw)?;
                    regions.push(RingRegion::Polygon(points));
                }

                RingShape::Petal => {
                    let petal_center = polar(center, radius, ang);
                    extent.expand(&petal_center);
                    art.ellipse(petal_center, 0.38 * radius, 0.87 * radius, ang, lw)?;
                    regions.push(RingRegion::Petal(petal_center, ang));
                }

            }

        }

        art.circle(*center, radius, lw)?;

    }

    art.circle(*center, 0.12 * r_max, lw)?;

    let margin = 0.04 * r_max;

    for region in &regions {

        match region {

            RingRegion::Polygon(points) => {
                let c = centroid(points)?;
                if point_in_polygon(&c, points) && extent.strictly_contains(&c, margin) {
                    art.annotate(hints, rng, c, 9.0, 0.0, 1.2);
                }
            }

            RingRegion::Petal(c, ang) => {
                if extent.strictly_contains(c, margin) {
                    art.annotate(hints, rng, *c, 9.0, *ang, 1.0);
                }
            }

        }

    }

    if extent.strictly_contains(center, margin) {
        art.annotate(hints, rng, *center, 10.0, 0.0, 1.8);
    }

    art.view = Some(extent.inflated(margin));

    Ok(art)

}

//////////////////////////////////////////////////////////////////////
// one large structured pattern, drawn in five layers from the
// center outward

fn draw_easy<R: RandomSource>(center: &Point2d,
                              r: f64,
                              lw: f64,
                              layout: &EasyLayout,
                              hints: &mut Hints,
                              rng: &mut R) -> Result<Artwork> {

    if layout.sectors < 3 || layout.ring_count == 0 || layout.rim.is_empty() {
        bail!(ErrorKind::Generation(format!("degenerate easy layout: {:?}", layout)));
    }

    let mut art = Artwork::default();
    let up = 0.5 * PI;

    // 1. center ornament
    match layout.ornament {

        CenterOrnament::Polygon { sides } => {
            art.polygon(regular_polygon(center, 0.12 * r, sides, up)?, lw)?;
        }

        CenterOrnament::NestedPolygons { sides } => {
            for (idx, f) in [0.16, 0.11, 0.06].iter().enumerate() {
                let rotation = up + (idx as f64) * PI / (sides as f64);
                art.polygon(regular_polygon(center, f * r, sides, rotation)?, lw)?;
            }
        }

        CenterOrnament::StarTriangle { points } => {
            art.polygon(star_polygon(center, 0.17 * r, 0.08 * r, points, up)?, lw)?;
            art.polygon(regular_polygon(center, 0.07 * r, 3, up)?, lw)?;
        }

        CenterOrnament::TriangleRing { count } => {
            for ang in even_angles(count, up) {
                let c = polar(center, 0.11 * r, ang);
                art.polygon(regular_polygon(&c, 0.04 * r, 3, ang)?, lw)?;
            }
        }

        CenterOrnament::PolygonCircles => {
            art.polygon(regular_polygon(center, 0.14 * r, 6, up)?, lw)?;
            art.circle(*center, 0.05 * r, lw)?;
            art.circle(*center, 0.09 * r, lw)?;
        }

    }

    // 2. inner polygon with spokes splitting it into sectors
    let inner = regular_polygon(center, 0.32 * r, layout.sectors, layout.rotation)?;

    for (v, ang) in inner.iter().zip(even_angles(layout.sectors, layout.rotation)) {
        art.line(polar(center, 0.18 * r, ang), *v, 0.7 * lw)?;
    }

    art.polygon(inner, lw)?;

    // 3. middle ring
    let step = TAU / (layout.ring_count as f64);

    for ang in even_angles(layout.ring_count, 0.0) {

        match layout.ring {

            MiddleRing::Petals => {
                art.ellipse(polar(center, 0.55 * r, ang), 0.26 * r, 0.11 * r, ang, lw)?;
            }

            MiddleRing::Ovals => {
                art.ellipse(polar(center, 0.55 * r, ang), 0.14 * r, 0.08 * r, ang, lw)?;
            }

            MiddleRing::Triangles => {
                let c = polar(center, 0.55 * r, ang);
                art.polygon(regular_polygon(&c, 0.05 * r, 3, ang)?, lw)?;
            }

            MiddleRing::LayeredPetals => {
                let offset = ang + 0.5 * step;
                art.ellipse(polar(center, 0.5 * r, ang), 0.2 * r, 0.09 * r, ang, lw)?;
                art.ellipse(polar(center, 0.62 * r, offset), 0.2 * r, 0.09 * r, offset, lw)?;
            }

        }

    }

    // 4. outer rim
    let rim_angles = even_angles(layout.rim.len(), 0.0);

    for (element, &ang) in layout.rim.iter().zip(rim_angles.iter()) {

        let c = polar(center, 0.87 * r, ang);

        match element {
            RimElement::Circle => art.circle(c, 0.06 * r, lw)?,
            RimElement::Square => art.polygon(regular_polygon(&c, 0.06 * r, 4, ang + 0.25 * PI)?, lw)?,
            RimElement::Triangle => art.polygon(regular_polygon(&c, 0.06 * r, 3, ang)?, lw)?
        }

    }

    // 5. optional guide circles
    for &f in &layout.guides {
        art.circle(*center, f * r, lw)?;
    }

    // hints: one per sector, one per rim element
    let half_sector = PI / (layout.sectors as f64);

    for ang in even_angles(layout.sectors, layout.rotation + half_sector) {
        art.annotate(hints, rng, polar(center, 0.25 * r, ang), 9.0, 0.0, 1.2);
    }

    for &ang in &rim_angles {
        art.annotate(hints, rng, polar(center, 0.87 * r, ang), 8.0, 0.0, 1.0);
    }

    Ok(art)

}

//////////////////////////////////////////////////////////////////////
// packing engine for the free-form style: rejection sampling of
// circular footprints with a separation constraint that relaxes as
// attempts run out

#[derive(Debug, Clone, PartialEq)]
struct Placement {
    center:      Point2d,
    radius:      f64,
    min_overlap: f64,  // relaxation in force when this was accepted
    attempt:     usize // 1-based try that accepted it
}

#[derive(Debug, Clone)]
struct PackingParams {
    half_dims:         Vec2d,        // canvas is [-x, x] by [-y, y]
    count:             (usize, usize), // target count drawn from [lo, hi]
    radius_band:       (f64, f64),
    topup_radius_band: (f64, f64),
    overlap_start:     f64,
    overlap_step:      f64,          // also shrinks the upper radius bound
    overlap_ceiling:   f64,
    topup_factor:      f64,
    max_primary_tries: usize,
    max_total_tries:   usize
}

impl Default for PackingParams {
    fn default() -> Self {
        PackingParams {
            half_dims: Vec2d::new(CANVAS_HALF_WIDTH, CANVAS_HALF_HEIGHT),
            count: (MIN_MOTIFS, MAX_MOTIFS),
            radius_band: RADIUS_BAND,
            topup_radius_band: TOPUP_RADIUS_BAND,
            overlap_start: OVERLAP_START,
            overlap_step: OVERLAP_STEP,
            overlap_ceiling: OVERLAP_CEILING,
            topup_factor: TOPUP_OVERLAP_FACTOR,
            max_primary_tries: MAX_PRIMARY_TRIES,
            max_total_tries: MAX_TOTAL_TRIES
        }
    }
}

#[derive(Debug)]
struct Packing {
    placements:  Vec<Placement>,
    target:      usize,
    attempts:    usize,
    min_overlap: f64, // primary-pass relaxation when it stopped
    radius_hi:   f64  // primary-pass upper radius bound when it stopped
}

// d >= r1 + r2 - (r1 + r2) * min_overlap against every placement
fn can_fit(center: &Point2d,
           radius: f64,
           placements: &[Placement],
           min_overlap: f64) -> bool {

    placements.iter().all(|p| {
        let reach = p.radius + radius;
        nalgebra::distance(&p.center, center) >= reach - reach * min_overlap
    })

}

// uniform in [-half + r, half - r], or 0 if the footprint can't fit
fn inset_coordinate<R: RandomSource>(half: f64, r: f64, rng: &mut R) -> f64 {
    if r < half { rng.uniform(-half + r, half - r) } else { 0.0 }
}

fn random_center<R: RandomSource>(half_dims: &Vec2d, r: f64, rng: &mut R) -> Point2d {
    let x = inset_coordinate(half_dims.x, r, rng);
    let y = inset_coordinate(half_dims.y, r, rng);
    Point2d::new(x, y)
}

fn pack_motifs<R: RandomSource>(params: &PackingParams, rng: &mut R) -> Packing {

    let target = rng.int(params.count.0, params.count.1);

    let max_relax_steps = ((params.overlap_ceiling - params.overlap_start)
                           / params.overlap_step).round().max(0.0) as usize;

    let (r_lo, mut r_hi) = params.radius_band;
    let mut relax_steps = 0;
    let mut min_overlap = params.overlap_start;

    let mut placements: Vec<Placement> = Vec::new();
    let mut tries = 0;

    while placements.len() < target && tries < params.max_primary_tries {

        if tries > params.max_primary_tries / 2 && relax_steps < max_relax_steps {
            relax_steps += 1;
            min_overlap = params.overlap_start + params.overlap_step * (relax_steps as f64);
            r_hi -= params.overlap_step;
        }

        tries += 1;

        let radius = rng.uniform(r_lo, r_hi);
        let center = random_center(&params.half_dims, radius, rng);

        if can_fit(&center, radius, &placements, min_overlap) {
            placements.push(Placement { center: center, radius: radius,
                                        min_overlap: min_overlap, attempt: tries });
        }

    }

    debug!("primary pass placed {:}/{:} motifs in {:} tries (overlap {:.2})",
           placements.len(), target, tries, min_overlap);

    let topup_overlap = min_overlap * params.topup_factor;
    let (t_lo, t_hi) = params.topup_radius_band;

    while placements.len() < params.count.0 && tries < params.max_total_tries {

        tries += 1;

        let radius = rng.uniform(t_lo, t_hi);
        let center = random_center(&params.half_dims, radius, rng);

        if can_fit(&center, radius, &placements, topup_overlap) {
            placements.push(Placement { center: center, radius: radius,
                                        min_overlap: topup_overlap, attempt: tries });
        }

    }

    if placements.len() < params.count.0 {
        warn!("only placed {:} of at least {:} motifs after {:} tries",
              placements.len(), params.count.0, tries);
    }

    Packing {
        placements: placements,
        target: target,
        attempts: tries,
        min_overlap: min_overlap,
        radius_hi: r_hi
    }

}

//////////////////////////////////////////////////////////////////////
// composer: pick the style, build the artwork, collect the legend

fn compose<R: RandomSource>(config: &GenerationConfig,
                            rng: &mut R) -> Result<(Artwork, Option<Legend>)> {

    let mut hints = Hints::new(config.hint_mode, config.palette);
    let origin = Point2d::origin();

    let artwork = match config.style {

        CompositionStyle::GeometricRings => {
            check_radius("max_radius", config.max_radius)?;
            let lw = rng.uniform(1.7, 2.2);
            let motif = Motif::random_geometric(rng)?;
            motif.synthesize(&origin, config.max_radius, lw, &mut hints, rng)?
        }

        CompositionStyle::EasyStructured => {
            check_radius("max_radius", config.max_radius)?;
            let lw = rng.uniform(1.6, 2.1);
            let motif = Motif::random_easy(rng)?;
            motif.synthesize(&origin, config.max_radius, lw, &mut hints, rng)?
        }

        CompositionStyle::FreeForm => {

            let packing = pack_motifs(&PackingParams::default(), rng);

            debug!("packed {:} motifs (target {:}) in {:} attempts, last accepted on try {:}, \
                    overlap relaxed to {:.2} with radii below {:.2}",
                   packing.placements.len(), packing.target, packing.attempts,
                   packing.placements.last().map_or(0, |p| p.attempt),
                   packing.min_overlap, packing.radius_hi);

            let mut art = Artwork::default();

            for placement in &packing.placements {
                let lw = rng.uniform(1.4, 2.1);
                let motif = Motif::random_free_form(rng)?;
                art.extend(motif.synthesize(&placement.center, placement.radius,
                                            lw, &mut hints, rng)?);
            }

            art

        }

    };

    debug!("composed {:} shapes, {:} hints, {:} distinct labels",
           artwork.shapes.len(), artwork.annotations.len(), hints.labels.len());

    Ok((artwork, hints.legend()))

}

// compose and rasterize to path; returns the legend in number mode
fn generate<R: RandomSource>(config: &GenerationConfig,
                             path: &Path,
                             rng: &mut R) -> Result<Option<Legend>> {

    let (artwork, legend) = compose(config, rng)?;

    rasterize(&artwork, path)?;

    Ok(legend)

}

//////////////////////////////////////////////////////////////////////

#[derive(Debug,PartialEq)]
enum TextAsPath {
    Yes,
    No
}

trait CairoVecOps {

    fn moveto(&self, p: &Point2d);
    fn lineto(&self, p: &Point2d);
    fn drawpoly(&self, poly: &[Point2d]);
    fn drawpolyline(&self, poly: &[Point2d]);
    fn centertext(&self, p: &Point2d, text: &str, as_path: TextAsPath);
    fn showtext(&self, p: &Point2d, text: &str, as_path: TextAsPath);
    fn translatep(&self, p: &Point2d);

}

impl CairoVecOps for cairo::Context {

    fn translatep(&self, p: &Point2d) {
        self.translate(p.x, p.y);
    }

    fn moveto(&self, p: &Point2d) {
        self.move_to(p.x, p.y);
    }

    fn lineto(&self, p: &Point2d) {
        self.line_to(p.x, p.y);
    }

    fn drawpolyline(&self, poly: &[Point2d]) {
        for (i, p) in poly.iter().enumerate() {
            if i == 0 {
                self.moveto(p);
            } else {
                self.lineto(p);
            }
        }
    }

    fn drawpoly(&self, poly: &[Point2d]) {
        self.drawpolyline(poly);
        self.close_path();
    }

    // ink box of the text centered on p
    fn centertext(&self, p: &Point2d, text: &str, as_path: TextAsPath) {

        let extents = self.text_extents(text);

        let offset = Vec2d::new(extents.width + 2.0 * extents.x_bearing,
                                extents.height + 2.0 * extents.y_bearing);

        self.showtext(&(p - 0.5 * offset), text, as_path);

    }

    fn showtext(&self, p: &Point2d, text: &str, as_path: TextAsPath) {

        self.moveto(&p);

        if as_path == TextAsPath::No {
            self.show_text(text);
        } else {
            self.text_path(text);
        }

    }

}

macro_rules! with_save_restore {

    ($ctx:ident, { $($tree:tt)* }) => {

        $ctx.save();

        {

            $($tree)*

        }

        $ctx.restore();

    }

}

//////////////////////////////////////////////////////////////////////
// rasterizer: artwork -> tightly cropped PNG on a transparent
// background

fn draw_artwork(ctx: &cairo::Context,
                artwork: &Artwork,
                transform: &Transform2d,
                scl: f64,
                clip: Option<&Rect2d>) {

    if let Some(rect) = clip {
        let d = rect.dims();
        ctx.rectangle(rect.p0.x, rect.p0.y, d.x, d.y);
        ctx.clip();
    }

    ctx.set_source_rgb(0.0, 0.0, 0.0);
    ctx.set_line_join(cairo::LineJoin::Round);
    ctx.set_line_cap(cairo::LineCap::Round);

    for shape in &artwork.shapes {

        ctx.set_line_width(shape.line_width * PX_PER_POINT);

        match &shape.outline {

            Outline::Circle { center, radius } => {
                let c = transform * center;
                ctx.new_sub_path();
                ctx.arc(c.x, c.y, radius * scl, 0.0, TAU);
            }

            // path is built in a scaled frame but stroked after the
            // restore so the pen stays round
            Outline::Ellipse { center, width, height, angle } => {
                let c = transform * center;
                with_save_restore!(ctx, {
                    ctx.translatep(&c);
                    ctx.rotate(-angle);
                    ctx.scale(0.5 * width * scl, 0.5 * height * scl);
                    ctx.new_sub_path();
                    ctx.arc(0.0, 0.0, 1.0, 0.0, TAU);
                });
            }

            Outline::Polygon(points) => {
                let xpoints: Vec<Point2d> = points.iter().map(|p| transform * p).collect();
                ctx.drawpoly(&xpoints);
            }

            Outline::Polyline(points) => {
                let xpoints: Vec<Point2d> = points.iter().map(|p| transform * p).collect();
                ctx.drawpolyline(&xpoints);
            }

        }

        ctx.stroke();

    }

    ctx.select_font_face("Sans", cairo::FontSlant::Normal, cairo::FontWeight::Bold);

    for note in &artwork.annotations {

        let p = transform * note.pos;

        with_save_restore!(ctx, {

            ctx.translatep(&p);
            ctx.rotate(-note.rotation);
            ctx.set_font_size(note.font_size * PX_PER_POINT);
            ctx.set_line_width(note.halo * PX_PER_POINT);

            ctx.centertext(&Point2d::origin(), note.text.as_str(), TextAsPath::Yes);
            ctx.set_source_rgb(1.0, 1.0, 1.0);
            ctx.stroke_preserve();
            ctx.set_source_rgb(0.0, 0.0, 0.0);
            ctx.fill();

        });

    }

}

// cairo ARGB32 is premultiplied, one native-endian u32 per pixel
fn surface_to_rgba(data: &[u8], width: u32, height: u32, stride: usize) -> image::RgbaImage {

    let mut img = image::RgbaImage::new(width, height);

    for (y, row) in data.chunks(stride).take(height as usize).enumerate() {

        for x in 0..width as usize {

            let px = &row[4*x..4*x + 4];
            let v = u32::from_ne_bytes([px[0], px[1], px[2], px[3]]);

            let a = (v >> 24) & 0xff;

            let unmul = |c: u32| -> u8 {
                if a == 0 { 0 } else { ((c * 255 + a / 2) / a).min(255) as u8 }
            };

            img.put_pixel(x as u32, y as u32, image::Rgba([
                unmul((v >> 16) & 0xff),
                unmul((v >> 8) & 0xff),
                unmul(v & 0xff),
                a as u8
            ]));

        }

    }

    img

}

// crop to the bounding box of pixels with nonzero alpha
fn trim_transparent(img: &image::RgbaImage) -> image::RgbaImage {

    let mut bbox: Option<(u32, u32, u32, u32)> = None;

    for (x, y, px) in img.enumerate_pixels() {

        if px.0[3] == 0 {
            continue;
        }

        bbox = Some(match bbox {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y))
        });

    }

    match bbox {
        None => img.clone(),
        Some((x0, y0, x1, y1)) =>
            image::imageops::crop_imm(img, x0, y0, x1 - x0 + 1, y1 - y0 + 1).to_image()
    }

}

fn rasterize(artwork: &Artwork, path: &Path) -> Result<()> {

    let contents_rect = match &artwork.view {
        Some(view) => view.clone(),
        None => artwork.bounds()
    };

    let cdims = contents_rect.dims();

    if contents_rect.is_empty() || cdims.x <= 0.0 || cdims.y <= 0.0 {
        bail!(ErrorKind::Generation("nothing to draw".to_string()));
    }

    let scl = PIXELS_PER_UNIT.min(MAX_IMAGE_SIDE / cdims.max());

    let width = (cdims.x * scl + 2.0 * IMAGE_PAD_PX).ceil();
    let height = (cdims.y * scl + 2.0 * IMAGE_PAD_PX).ceil();

    let page_rect = Rect2d::new(
        Point2d::new(IMAGE_PAD_PX, IMAGE_PAD_PX),
        Point2d::new(width - IMAGE_PAD_PX, height - IMAGE_PAD_PX));

    let (transform, scl) = get_page_transform(&contents_rect, &page_rect);

    let mut surface = cairo::ImageSurface::create(
        cairo::Format::ARgb32, width as i32, height as i32)?;

    {
        let ctx = cairo::Context::new(&surface);
        let clip = artwork.view.as_ref().map(|_| &page_rect);
        draw_artwork(&ctx, artwork, &transform, scl, clip);
    }

    surface.flush();

    let stride = surface.get_stride() as usize;

    let img = {
        let data = surface.get_data()?;
        surface_to_rgba(&data, width as u32, height as u32, stride)
    };

    let trimmed = trim_transparent(&img);

    trimmed.save_with_format(path, image::ImageFormat::Png)?;

    debug!("wrote {:}x{:} image to {:}",
           trimmed.width(), trimmed.height(), path.display());

    Ok(())

}

//////////////////////////////////////////////////////////////////////
// page layout: the image on an A4 page with an optional legend table

// read an image file into a premultiplied ARGB32 cairo surface
fn load_image_surface(filename: &Path) -> Result<cairo::ImageSurface> {

    let img = image::open(filename)
        .chain_err(|| format!("image file not found: {:}", filename.display()))?
        .to_rgba8();

    let format = cairo::Format::ARgb32;

    let stride = match format.stride_for_width(img.width()) {
        Ok(s) => (s as usize),
        _ => { bail!("no stride for image width {:}", img.width()); }
    };

    let min_stride = (img.width() * 4) as usize;

    debug_assert!(stride >= min_stride);

    let mut buf: Vec<u8> = vec![];
    let padding = vec![0u8; stride - min_stride];

    for row in img.rows() {

        for pixel in row {
            let [r, g, b, a] = pixel.0;
            let mul = |c: u8| -> u32 { (c as u32 * a as u32 + 127) / 255 };
            let v = ((a as u32) << 24) | (mul(r) << 16) | (mul(g) << 8) | mul(b);
            buf.extend(&v.to_ne_bytes());
        }

        buf.extend(&padding);

    }

    debug_assert!(buf.len() == (img.height() as usize) * stride);

    let surface = cairo::ImageSurface::create_for_data(
        buf, format,
        img.width() as i32,
        img.height() as i32,
        stride as i32)?;

    Ok(surface)

}

// header row plus one row per LEGEND_COLUMNS entries
fn legend_rows(entries: usize) -> usize {
    1 + (entries + LEGEND_COLUMNS - 1) / LEGEND_COLUMNS
}

fn draw_legend_table(ctx: &cairo::Context,
                     legend: &[(usize, String)],
                     top_left: &Point2d,
                     width: f64) {

    let columns = legend.len().min(LEGEND_COLUMNS).max(1);

    let col_width = width / (columns as f64);
    let num_width = 0.3 * col_width;
    let name_width = col_width - num_width;

    let cell = |x: f64, y: f64, w: f64, text: &str| {
        ctx.rectangle(x, y, w, LEGEND_ROW_HEIGHT);
        ctx.stroke();
        ctx.centertext(&Point2d::new(x + 0.5 * w, y + 0.5 * LEGEND_ROW_HEIGHT),
                       text, TextAsPath::No);
    };

    with_save_restore!(ctx, {

        ctx.set_source_rgb(0.0, 0.0, 0.0);
        ctx.set_line_width(0.5);
        ctx.set_font_size(LEGEND_FONT_SIZE);

        ctx.select_font_face("Sans", cairo::FontSlant::Normal, cairo::FontWeight::Bold);

        for col in 0..columns {
            let x = top_left.x + (col as f64) * col_width;
            cell(x, top_left.y, num_width, "No.");
            cell(x + num_width, top_left.y, name_width, "Color Name");
        }

        ctx.select_font_face("Sans", cairo::FontSlant::Normal, cairo::FontWeight::Normal);

        for (row, chunk) in legend.chunks(LEGEND_COLUMNS).enumerate() {

            let y = top_left.y + ((row + 1) as f64) * LEGEND_ROW_HEIGHT;

            for (col, (number, name)) in chunk.iter().enumerate() {
                let x = top_left.x + (col as f64) * col_width;
                cell(x, y, num_width, format!("{:}", number).as_str());
                cell(x + num_width, y, name_width, name.as_str());
            }

        }

    });

}

fn write_page(image_path: &Path,
              legend: Option<&[(usize, String)]>,
              pdf_path: &Path) -> Result<()> {

    let image = load_image_surface(image_path)?;

    let surface = cairo::PdfSurface::new(A4_WIDTH, A4_HEIGHT, pdf_path)?;
    let ctx = cairo::Context::new(&surface);

    let table_height = match legend {
        Some(entries) => (legend_rows(entries.len()) as f64) * LEGEND_ROW_HEIGHT + LEGEND_GAP,
        None => 0.0
    };

    let box_width = IMAGE_BOX_WIDTH;
    let box_height = IMAGE_BOX_HEIGHT.min(A4_HEIGHT - 2.0 * MARGIN - table_height);

    let iw = image.get_width() as f64;
    let ih = image.get_height() as f64;

    let scl = (box_width / iw).min(box_height / ih);

    let image_left = MARGIN + 0.5 * (box_width - iw * scl);

    with_save_restore!(ctx, {
        ctx.translate(image_left, MARGIN);
        ctx.scale(scl, scl);
        ctx.set_source_surface(&image, 0.0, 0.0);
        ctx.paint();
    });

    if let Some(entries) = legend {
        let top_left = Point2d::new(MARGIN, MARGIN + ih * scl + LEGEND_GAP);
        draw_legend_table(&ctx, entries, &top_left, A4_WIDTH - 2.0 * MARGIN);
    }

    ctx.show_page();

    Ok(())

}

//////////////////////////////////////////////////////////////////////
// persisted settings: a flat JSON record with string-valued choices

// define lookup tables matching settings strings to enumerations
static HINT_MODE_LOOKUP: phf::Map<&'static str, HintMode> = phf_map! {
    "none" => HintMode::None,
    "name" => HintMode::Name,
    "number" => HintMode::Number,
};

static PALETTE_LOOKUP: phf::Map<&'static str, Palette> = phf_map! {
    "basic" => Palette::Basic,
    "advanced" => Palette::Advanced,
};

static STYLE_LOOKUP: phf::Map<&'static str, CompositionStyle> = phf_map! {
    "random" => CompositionStyle::FreeForm,
    "free_form" => CompositionStyle::FreeForm,
    "geometric" => CompositionStyle::GeometricRings,
    "geometric_rings" => CompositionStyle::GeometricRings,
    "easy_mandala" => CompositionStyle::EasyStructured,
    "easy_structured" => CompositionStyle::EasyStructured,
};

const DEFAULT_MAX_RADIUS: f64 = 1.35;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct Settings {

    #[serde(skip_serializing_if = "Option::is_none")]
    color_hint_mode: Option<String>,

    color_mode: String,
    batch_count: usize,
    mandala_style: String,
    mandala_max_radius: f64,

    // older configs only had this switch
    #[serde(skip_serializing_if = "Option::is_none")]
    write_color_names: Option<bool>

}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            color_hint_mode: None,
            color_mode: "basic".to_string(),
            batch_count: 1,
            mandala_style: "random".to_string(),
            mandala_max_radius: DEFAULT_MAX_RADIUS,
            write_color_names: None
        }
    }
}

fn lookup<T: Copy>(map: &phf::Map<&'static str, T>,
                   what: &str,
                   value: &str,
                   fallback: T) -> T {

    match map.get(value) {
        Some(&v) => v,
        None => {
            warn!("unknown {:} \"{:}\", using default", what, value);
            fallback
        }
    }

}

impl Settings {

    fn load(path: &Path) -> Result<Settings> {

        let f = File::open(path)
            .chain_err(|| format!("can't open config file {:}", path.display()))?;

        let settings: Settings = serde_json::from_reader(BufReader::new(f))?;

        Ok(settings.convert_legacy())

    }

    fn save(&self, path: &Path) -> Result<()> {

        let f = File::create(path)?;

        serde_json::to_writer_pretty(f, self)?;

        Ok(())

    }

    // fill in color_hint_mode from write_color_names if needed
    fn convert_legacy(mut self) -> Self {

        if self.color_hint_mode.is_none() {
            let mode = match self.write_color_names {
                Some(true) => "name",
                _ => "none"
            };
            self.color_hint_mode = Some(mode.to_string());
        }

        self

    }

    fn generation_config(&self) -> GenerationConfig {

        let hint_mode = self.color_hint_mode.as_deref().unwrap_or("none");

        GenerationConfig {
            hint_mode: lookup(&HINT_MODE_LOOKUP, "color_hint_mode",
                              hint_mode, HintMode::None),
            palette: lookup(&PALETTE_LOOKUP, "color_mode",
                            &self.color_mode, Palette::Basic),
            style: lookup(&STYLE_LOOKUP, "mandala_style",
                          &self.mandala_style, CompositionStyle::FreeForm),
            max_radius: self.mandala_max_radius
        }

    }

}

//////////////////////////////////////////////////////////////////////
// interactive prompting for settings

fn prompt<R: BufRead, W: Write>(input: &mut R,
                                output: &mut W,
                                question: &str) -> Result<String> {

    write!(output, "{:} ", question)?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;

    Ok(line.trim().to_lowercase())

}

// answer if it is one of choices, else fallback
fn pick(answer: String, choices: &[&str], fallback: &str) -> String {
    if choices.contains(&answer.as_str()) { answer } else { fallback.to_string() }
}

fn ask_settings_interactive<R: BufRead, W: Write>(input: &mut R,
                                                  output: &mut W) -> Result<Settings> {

    writeln!(output, "\n--- MANUAL CONFIGURATION ---")?;
    writeln!(output, "Example configuration:")?;
    writeln!(output, "{{\"color_hint_mode\": \"number\", \"color_mode\": \"advanced\", \
                      \"batch_count\": 2, \"mandala_style\": \"easy_mandala\", \
                      \"mandala_max_radius\": 1.42}}\n")?;

    let answer = prompt(input, output, "How do you want coloring hints? [none/name/number]:")?;
    let color_hint_mode = pick(answer, &["none", "name", "number"], "none");

    let answer = prompt(input, output, "Which color list to use? [basic/advanced]:")?;
    let color_mode = pick(answer, &["basic", "advanced"], "basic");

    let answer = prompt(input, output, "How many PDFs to generate? (number, example: 2):")?;
    let batch_count = answer.parse::<usize>().unwrap_or(1);

    let answer = prompt(input, output, "Mandala style? [random/geometric/easy_mandala]:")?;
    let mandala_style = pick(answer, &["random", "geometric", "easy_mandala"], "random");

    let mandala_max_radius = if mandala_style == "random" {
        DEFAULT_MAX_RADIUS
    } else {
        let answer = prompt(input, output,
                            "Max radius for geometric/easy mandala? (recommended: 1.35-1.48):")?;
        match answer.parse::<f64>() {
            Ok(r) if r.is_finite() && r > 0.0 => r,
            _ => DEFAULT_MAX_RADIUS
        }
    };

    Ok(Settings {
        color_hint_mode: Some(color_hint_mode),
        color_mode: color_mode,
        batch_count: batch_count,
        mandala_style: mandala_style,
        mandala_max_radius: mandala_max_radius,
        write_color_names: None
    })

}

//////////////////////////////////////////////////////////////////////
// file and directory bookkeeping

fn ensure_dirs(dirs: &[&Path]) -> Result<()> {

    for dir in dirs {
        std::fs::create_dir_all(dir)
            .chain_err(|| format!("can't create directory {:}", dir.display()))?;
    }

    Ok(())

}

fn clean_temp(dir: &Path) -> Result<()> {

    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }

    Ok(())

}

// output{N}.pdf with N the smallest positive integer not yet taken
fn next_output_filename(dir: &Path) -> Result<String> {

    let mut used = HashSet::new();

    for entry in std::fs::read_dir(dir)? {

        let name = entry?.file_name();

        let number = name.to_str()
            .and_then(|s| s.strip_prefix("output"))
            .and_then(|s| s.strip_suffix(".pdf"))
            .and_then(|s| s.parse::<usize>().ok());

        if let Some(n) = number {
            used.insert(n);
        }

    }

    Ok(format!("output{:}.pdf", next_unused_number(&used)))

}

// generate one page and lay it out; returns the PDF written
fn make_page<R: RandomSource>(config: &GenerationConfig,
                              image_path: &Path,
                              output_dir: &Path,
                              rng: &mut R) -> Result<PathBuf> {

    let legend = generate(config, image_path, rng)?;

    if let Some(entries) = &legend {
        debug!("legend has {:} entries", entries.len());
    }

    let pdf_path = output_dir.join(next_output_filename(output_dir)?);

    write_page(image_path, legend.as_deref(), &pdf_path)?;

    Ok(pdf_path)

}

// write count pages; a page whose generation fails is skipped, any
// other failure (files, cairo, image encoding) ends the batch
fn run_batch<R: RandomSource>(config: &GenerationConfig,
                              count: usize,
                              tmp_dir: &Path,
                              output_dir: &Path,
                              rng: &mut R) -> Result<usize> {

    let image_path = tmp_dir.join(MANDALA_IMAGE);
    let mut written = 0;

    for i in 0..count {

        ensure_dirs(&[tmp_dir, output_dir])?;

        info!("generating mandala {:}/{:}", i + 1, count);

        let result = make_page(config, &image_path, output_dir, rng);

        clean_temp(tmp_dir)?;

        match result {

            Ok(pdf_path) => {
                info!("wrote {:}", pdf_path.display());
                written += 1;
            }

            Err(e) => {

                let skippable = match e.kind() {
                    ErrorKind::Generation(_) => true,
                    _ => false
                };

                if !skippable {
                    return Err(e);
                }

                error!("skipping page {:}: {:}", i + 1, e);

            }

        }

    }

    Ok(written)

}

//////////////////////////////////////////////////////////////////////

fn run() -> Result<()> {

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() > 2 {
        eprintln!("usage: {:} [CONFIGFILE]", args[0]);
        std::process::exit(1);
    }

    let config_path = Path::new(args.get(1).map(|s| s.as_str()).unwrap_or(CONFIG_FILE));

    let settings = if config_path.exists() {

        info!("configuration found in {:}", config_path.display());
        Settings::load(config_path)?

    } else {

        let stdin = std::io::stdin();
        let mut input = stdin.lock();
        let mut output = std::io::stdout();

        let settings = ask_settings_interactive(&mut input, &mut output)?;
        settings.save(config_path)?;

        info!("configuration saved in {:}", config_path.display());
        settings

    };

    let config = settings.generation_config();

    debug!("{:?}", config);

    let mut rng = rand::thread_rng();

    info!("generating {:} page(s)", settings.batch_count);

    let written = run_batch(&config, settings.batch_count,
                            Path::new(TMP_DIR), Path::new(OUTPUT_DIR), &mut rng)?;

    info!("done: {:} of {:} page(s) in {:}/", written, settings.batch_count, OUTPUT_DIR);

    Ok(())

}

quick_main!(run);

//////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {

    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand::rngs::mock::StepRng;
    use std::io::Cursor;

    // fresh scratch directory per test
    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("mandala_pages_{:}_{:}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn is_generation_error(err: &Error) -> bool {
        match err.kind() {
            ErrorKind::Generation(_) => true,
            _ => false
        }
    }

    fn unit_square() -> Vec<Point2d> {
        vec![
            Point2d::new(0.0, 0.0),
            Point2d::new(1.0, 0.0),
            Point2d::new(1.0, 1.0),
            Point2d::new(0.0, 1.0)
        ]
    }

    fn config(hint_mode: HintMode, style: CompositionStyle) -> GenerationConfig {
        GenerationConfig {
            hint_mode: hint_mode,
            palette: Palette::Basic,
            style: style,
            max_radius: 1.4
        }
    }

    const STYLES: [CompositionStyle; 3] = [
        CompositionStyle::FreeForm,
        CompositionStyle::GeometricRings,
        CompositionStyle::EasyStructured
    ];

    //////////////////////////////////////////////////////////////////////
    // geometry

    #[test]
    fn regular_polygon_is_evenly_spaced_on_circle() {

        let points = regular_polygon(&Point2d::origin(), 1.0, 4, 0.0).unwrap();

        assert_eq!(points.len(), 4);

        for (i, p) in points.iter().enumerate() {

            assert_relative_eq!(p.coords.norm(), 1.0, epsilon = 1e-12);

            let q = &points[(i + 1) % 4];
            let mut diff = q.y.atan2(q.x) - p.y.atan2(p.x);
            if diff < 0.0 {
                diff += TAU;
            }

            assert_relative_eq!(diff, 0.5 * PI, epsilon = 1e-12);

        }

        assert_abs_diff_eq!(points[0].x, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(points[0].y, 0.0, epsilon = 1e-12);

    }

    #[test]
    fn star_polygon_alternates_radii() {

        let center = Point2d::new(2.0, -1.0);
        let points = star_polygon(&center, 1.0, 0.4, 5, 0.3).unwrap();

        assert_eq!(points.len(), 10);

        for (i, p) in points.iter().enumerate() {
            let expected = if i % 2 == 0 { 1.0 } else { 0.4 };
            assert_relative_eq!(nalgebra::distance(p, &center), expected, epsilon = 1e-12);
        }

    }

    #[test]
    fn invalid_geometry_is_a_generation_error() {

        let o = Point2d::origin();

        assert!(is_generation_error(&regular_polygon(&o, 0.0, 5, 0.0).unwrap_err()));
        assert!(is_generation_error(&regular_polygon(&o, -1.0, 5, 0.0).unwrap_err()));
        assert!(is_generation_error(&regular_polygon(&o, 1.0, 2, 0.0).unwrap_err()));
        assert!(is_generation_error(&star_polygon(&o, 0.5, 0.5, 5, 0.0).unwrap_err()));
        assert!(is_generation_error(&star_polygon(&o, 1.0, 0.5, 1, 0.0).unwrap_err()));
        assert!(is_generation_error(&centroid(&[]).unwrap_err()));

    }

    #[test]
    fn centroid_is_mean_of_points() {
        let c = centroid(&unit_square()).unwrap();
        assert_relative_eq!(c.x, 0.5);
        assert_relative_eq!(c.y, 0.5);
    }

    #[test]
    fn point_in_unit_square() {

        let square = unit_square();

        assert!(point_in_polygon(&Point2d::new(0.5, 0.5), &square));
        assert!(!point_in_polygon(&Point2d::new(1.5, 0.5), &square));
        assert!(!point_in_polygon(&Point2d::new(-0.5, 0.5), &square));
        assert!(!point_in_polygon(&Point2d::new(0.5, 1.5), &square));

        // on a horizontal edge: defined, no division by zero
        let on_edge = point_in_polygon(&Point2d::new(0.5, 0.0), &square);
        assert!(!on_edge);

    }

    #[test]
    fn point_in_concave_polygon() {

        // U shape open at the top
        let u = vec![
            Point2d::new(0.0, 0.0),
            Point2d::new(3.0, 0.0),
            Point2d::new(3.0, 3.0),
            Point2d::new(2.0, 3.0),
            Point2d::new(2.0, 1.0),
            Point2d::new(1.0, 1.0),
            Point2d::new(1.0, 3.0),
            Point2d::new(0.0, 3.0)
        ];

        assert!(point_in_polygon(&Point2d::new(0.5, 2.0), &u));
        assert!(point_in_polygon(&Point2d::new(2.5, 2.0), &u));
        assert!(!point_in_polygon(&Point2d::new(1.5, 2.0), &u));
        assert!(point_in_polygon(&Point2d::new(1.5, 0.5), &u));

    }

    #[test]
    fn rect_strict_containment_respects_inset() {

        let rect = Rect2d::new(Point2d::new(-1.0, -1.0), Point2d::new(1.0, 1.0));

        assert!(rect.strictly_contains(&Point2d::new(0.0, 0.0), 0.1));
        assert!(rect.strictly_contains(&Point2d::new(0.85, 0.0), 0.1));
        assert!(!rect.strictly_contains(&Point2d::new(0.9, 0.0), 0.1));
        assert!(!rect.strictly_contains(&Point2d::new(0.95, 0.0), 0.1));

    }

    #[test]
    fn ellipse_bounds_follow_rotation() {

        let shape = Shape {
            outline: Outline::Ellipse { center: Point2d::origin(),
                                        width: 4.0, height: 2.0, angle: 0.5 * PI },
            line_width: 1.0
        };

        let d = shape.bounds().dims();

        assert_relative_eq!(d.x, 2.0, epsilon = 1e-9);
        assert_relative_eq!(d.y, 4.0, epsilon = 1e-9);

    }

    //////////////////////////////////////////////////////////////////////
    // labels

    #[test]
    fn next_unused_number_fills_gaps() {

        let mut used = HashSet::new();
        assert_eq!(next_unused_number(&used), 1);

        used.extend(vec![1, 2, 4]);
        assert_eq!(next_unused_number(&used), 3);

        used.insert(3);
        assert_eq!(next_unused_number(&used), 5);

    }

    #[test]
    fn label_numbers_are_memoized() {

        let mut labels = LabelAllocator::default();

        assert_eq!(labels.number_for("Red"), 1);
        assert_eq!(labels.number_for("Blue"), 2);
        assert_eq!(labels.number_for("Red"), 1);
        assert_eq!(labels.number_for("Gray"), 3);
        assert_eq!(labels.number_for("Blue"), 2);

        assert_eq!(labels.len(), 3);

        assert_eq!(labels.legend().unwrap(), vec![
            (1, "Red".to_string()),
            (2, "Blue".to_string()),
            (3, "Gray".to_string())
        ]);

    }

    #[test]
    fn empty_allocator_has_no_legend() {
        assert!(LabelAllocator::default().legend().is_none());
    }

    #[test]
    fn hints_follow_mode() {

        let mut rng = StdRng::seed_from_u64(3);

        let mut none = Hints::new(HintMode::None, Palette::Advanced);
        assert!(!none.active());
        assert!(none.next_text(&mut rng).is_none());
        assert!(none.legend().is_none());

        let mut names = Hints::new(HintMode::Name, Palette::Advanced);
        let text = names.next_text(&mut rng).unwrap();
        assert!(ADVANCED_COLORS.contains(&text.as_str()));
        assert!(names.legend().is_none());

        let mut numbers = Hints::new(HintMode::Number, Palette::Basic);
        assert_eq!(numbers.next_text(&mut rng).unwrap(), "1");
        assert_eq!(numbers.legend().unwrap().len(), 1);

    }

    //////////////////////////////////////////////////////////////////////
    // motifs

    #[test]
    fn flower_hints_every_petal_and_center() {

        let mut rng = StdRng::seed_from_u64(11);
        let mut hints = Hints::new(HintMode::Name, Palette::Basic);

        let motif = Motif::Flower { petals: 14 };
        let art = motif.synthesize(&Point2d::new(0.2, 0.3), 0.5, 1.5,
                                   &mut hints, &mut rng).unwrap();

        assert_eq!(art.annotations.len(), 15);

        // core + 3 rings + petals
        assert_eq!(art.shapes.len(), 4 + 14);

        let ellipses = art.shapes.iter()
            .filter(|s| match s.outline { Outline::Ellipse { .. } => true, _ => false })
            .count();

        assert_eq!(ellipses, 14);

    }

    #[test]
    fn spiral_and_leaf_and_rays_have_fixed_skeletons() {

        let mut rng = StdRng::seed_from_u64(5);
        let mut hints = Hints::new(HintMode::None, Palette::Basic);
        let c = Point2d::origin();

        let spiral = Motif::Spiral { turns: 6 }
            .synthesize(&c, 0.4, 1.5, &mut hints, &mut rng).unwrap();

        match &spiral.shapes[0].outline {
            Outline::Polyline(points) => assert_eq!(points.len(), SPIRAL_SAMPLES),
            other => panic!("expected spiral polyline, got {:?}", other)
        }

        assert_eq!(spiral.shapes.len(), 4);

        let leaf = Motif::Leaf { leaves: 5 }
            .synthesize(&c, 0.4, 1.5, &mut hints, &mut rng).unwrap();

        // ellipse + stem per leaf, plus the core
        assert_eq!(leaf.shapes.len(), 2 * 5 + 1);

        let rays = Motif::RayBurst { rays: 24 }
            .synthesize(&c, 0.4, 1.5, &mut hints, &mut rng).unwrap();

        // ray + curl per ray, plus 4 guide circles
        assert_eq!(rays.shapes.len(), 2 * 24 + 4);

        assert!(spiral.annotations.is_empty());
        assert!(leaf.annotations.is_empty());
        assert!(rays.annotations.is_empty());

    }

    #[test]
    fn spiral_and_rays_hint_counts_are_bounded() {

        let c = Point2d::origin();

        for seed in 0..20 {

            let mut rng = StdRng::seed_from_u64(seed);
            let mut hints = Hints::new(HintMode::Number, Palette::Advanced);

            let spiral = Motif::Spiral { turns: 4 }
                .synthesize(&c, 0.5, 1.5, &mut hints, &mut rng).unwrap();
            assert!((1..=3).contains(&spiral.annotations.len()));

            let rays = Motif::RayBurst { rays: 20 }
                .synthesize(&c, 0.5, 1.5, &mut hints, &mut rng).unwrap();
            assert!((2..=6).contains(&rays.annotations.len()));

        }

    }

    #[test]
    fn motif_rejects_bad_radius_and_line_width() {

        let mut rng = StdRng::seed_from_u64(1);
        let mut hints = Hints::new(HintMode::None, Palette::Basic);
        let c = Point2d::origin();

        let motif = Motif::Leaf { leaves: 3 };

        assert!(is_generation_error(
            &motif.synthesize(&c, 0.0, 1.5, &mut hints, &mut rng).unwrap_err()));
        assert!(is_generation_error(
            &motif.synthesize(&c, -0.3, 1.5, &mut hints, &mut rng).unwrap_err()));
        assert!(is_generation_error(
            &motif.synthesize(&c, 0.3, 0.0, &mut hints, &mut rng).unwrap_err()));
        assert!(is_generation_error(
            &motif.synthesize(&c, f64::NAN, 1.5, &mut hints, &mut rng).unwrap_err()));

    }

    #[test]
    fn geometric_hints_stay_inside_cropped_view() {

        for seed in 0..10 {

            let mut rng = StdRng::seed_from_u64(seed);
            let mut hints = Hints::new(HintMode::Name, Palette::Basic);

            let motif = Motif::random_geometric(&mut rng).unwrap();
            let r_max = 1.4;

            let art = motif.synthesize(&Point2d::origin(), r_max, 2.0,
                                       &mut hints, &mut rng).unwrap();

            let view = art.view.clone().expect("geometric pattern crops its view");
            let margin = 0.04 * r_max;

            // view is the point extent grown by the margin, labels must
            // sit strictly inside the extent shrunk by it
            let extent = view.inflated(-margin);

            for note in &art.annotations {
                assert!(extent.strictly_contains(&note.pos, margin - 1e-9),
                        "hint at {:?} escapes {:?}", note.pos, extent);
            }

        }

    }

    #[test]
    fn geometric_levels_shape_the_skeleton() {

        let mut rng = StdRng::seed_from_u64(2);
        let mut hints = Hints::new(HintMode::None, Palette::Basic);

        let motif = Motif::GeometricRings(vec![
            RingLevel { shape: RingShape::Triangle, count: 8 },
            RingLevel { shape: RingShape::Petal, count: 10 },
            RingLevel { shape: RingShape::Polygon, count: 12 },
            RingLevel { shape: RingShape::Petal, count: 14 }
        ]);

        let art = motif.synthesize(&Point2d::origin(), 1.0, 2.0,
                                   &mut hints, &mut rng).unwrap();

        // shapes + a circle per level + the core
        assert_eq!(art.shapes.len(), 8 + 10 + 12 + 14 + 4 + 1);

        let view = art.view.unwrap();
        assert_relative_eq!(view.p1.x, 1.0 + 0.04, epsilon = 1e-9);

        let empty = Motif::GeometricRings(vec![]);
        assert!(is_generation_error(
            &empty.synthesize(&Point2d::origin(), 1.0, 2.0, &mut hints, &mut rng).unwrap_err()));

    }

    #[test]
    fn easy_motif_hints_sectors_and_rim() {

        let layout = EasyLayout {
            ornament: CenterOrnament::StarTriangle { points: 6 },
            sectors: 8,
            rotation: 0.1,
            ring: MiddleRing::LayeredPetals,
            ring_count: 16,
            rim: vec![RimElement::Circle, RimElement::Square, RimElement::Triangle,
                      RimElement::Circle, RimElement::Circle, RimElement::Circle,
                      RimElement::Circle, RimElement::Circle, RimElement::Circle,
                      RimElement::Circle, RimElement::Circle, RimElement::Circle,
                      RimElement::Circle, RimElement::Circle, RimElement::Circle,
                      RimElement::Circle],
            guides: vec![0.42, 1.0]
        };

        let mut rng = StdRng::seed_from_u64(9);
        let mut hints = Hints::new(HintMode::Number, Palette::Basic);

        let art = Motif::EasyStructured(layout)
            .synthesize(&Point2d::origin(), 1.4, 1.8, &mut hints, &mut rng).unwrap();

        assert_eq!(art.annotations.len(), 8 + 16);

        // star + triangle, 8 spokes + polygon, 2 * 16 petals, 16 rim, 2 guides
        assert_eq!(art.shapes.len(), 2 + 8 + 1 + 32 + 16 + 2);

        // sector hints sit between adjacent spokes
        for note in &art.annotations[..8] {
            assert_relative_eq!(note.pos.coords.norm(), 0.25 * 1.4, epsilon = 1e-9);
        }

    }

    #[test]
    fn random_easy_layouts_are_within_ranges() {

        for seed in 0..50 {

            let mut rng = StdRng::seed_from_u64(seed);
            let layout = EasyLayout::random(&mut rng).unwrap();

            assert!((6..=10).contains(&layout.sectors));
            assert!((12..=20).contains(&layout.ring_count));
            assert!(RIM_COUNTS.contains(&layout.rim.len()));
            assert!(layout.guides.len() <= 3);
            assert!(layout.guides.iter().all(|g| GUIDE_RADII.contains(g)));

        }

    }

    //////////////////////////////////////////////////////////////////////
    // packing

    // every pair satisfies the separation in force when the later of
    // the two was accepted
    fn assert_separated(placements: &[Placement]) {

        for (j, b) in placements.iter().enumerate() {
            for a in &placements[..j] {
                let reach = a.radius + b.radius;
                let d = nalgebra::distance(&a.center, &b.center);
                assert!(d >= reach - reach * b.min_overlap - 1e-12,
                        "{:?} and {:?} overlap too much", a, b);
            }
        }

    }

    #[test]
    fn packing_respects_separation_and_canvas() {

        let params = PackingParams::default();

        for seed in 0..8 {

            let mut rng = StdRng::seed_from_u64(seed);
            let packing = pack_motifs(&params, &mut rng);

            assert!((MIN_MOTIFS..=MAX_MOTIFS).contains(&packing.target));
            assert!(packing.placements.len() <= packing.target.max(MIN_MOTIFS));
            assert!(packing.attempts <= MAX_TOTAL_TRIES);

            assert_separated(&packing.placements);

            for p in &packing.placements {
                assert!(p.min_overlap <= OVERLAP_CEILING + 1e-9);
                assert!(p.center.x.abs() + p.radius <= CANVAS_HALF_WIDTH + 1e-9);
                assert!(p.center.y.abs() + p.radius <= CANVAS_HALF_HEIGHT + 1e-9);
            }

        }

    }

    #[test]
    fn packing_terminates_on_constant_draws() {

        // every candidate is identical, so only the first one fits
        let mut rng = StepRng::new(0, 0);
        let packing = pack_motifs(&PackingParams::default(), &mut rng);

        assert_eq!(packing.placements.len(), 1);
        assert_eq!(packing.attempts, MAX_TOTAL_TRIES);

        let first = &packing.placements[0];
        assert_eq!(first.attempt, 1);
        assert_eq!(first.min_overlap, OVERLAP_START);

        // the primary pass ran long enough to relax all the way
        assert_relative_eq!(packing.min_overlap, OVERLAP_CEILING, epsilon = 1e-9);
        assert_relative_eq!(packing.radius_hi, RADIUS_BAND.1 - 0.15, epsilon = 1e-9);

    }

    #[test]
    fn packing_relaxes_after_half_the_primary_tries() {

        // huge canvas, so nearly every try is accepted
        let params = PackingParams {
            half_dims: Vec2d::new(1e4, 1e4),
            count: (30, 30),
            max_primary_tries: 40,
            max_total_tries: 40,
            ..PackingParams::default()
        };

        let mut rng = StdRng::seed_from_u64(12);
        let packing = pack_motifs(&params, &mut rng);

        assert_eq!(packing.placements.len(), 30);

        assert!(packing.placements.iter().any(|p| p.attempt <= 20));
        assert!(packing.placements.iter().any(|p| p.attempt > 21));

        for p in &packing.placements {

            if p.attempt <= 21 {
                assert_eq!(p.min_overlap, OVERLAP_START, "relaxed too early: {:?}", p);
                assert!(p.radius < RADIUS_BAND.1);
            } else {
                let steps = (p.attempt - 21).min(15) as f64;
                assert!(p.min_overlap > OVERLAP_START);
                assert_relative_eq!(p.min_overlap, OVERLAP_START + OVERLAP_STEP * steps,
                                    epsilon = 1e-12);
                assert!(p.radius < RADIUS_BAND.1 - OVERLAP_STEP * steps + 1e-12);
            }

        }

        let steps = (packing.attempts - 21).min(15) as f64;

        assert_relative_eq!(packing.min_overlap, OVERLAP_START + OVERLAP_STEP * steps,
                            epsilon = 1e-12);
        assert_relative_eq!(packing.radius_hi, RADIUS_BAND.1 - OVERLAP_STEP * steps,
                            epsilon = 1e-12);

    }

    #[test]
    fn topup_pass_fills_to_the_minimum() {

        // one primary try, everything else comes from the top-up pass
        let params = PackingParams {
            half_dims: Vec2d::new(3.0, 3.0),
            max_primary_tries: 1,
            ..PackingParams::default()
        };

        let mut rng = StdRng::seed_from_u64(31);
        let packing = pack_motifs(&params, &mut rng);

        assert_eq!(packing.placements.len(), MIN_MOTIFS);
        assert!(packing.attempts <= MAX_TOTAL_TRIES);

        assert_eq!(packing.min_overlap, OVERLAP_START);
        assert_eq!(packing.radius_hi, RADIUS_BAND.1);

        let first = &packing.placements[0];

        assert_eq!(first.attempt, 1);
        assert_eq!(first.min_overlap, OVERLAP_START);
        assert!(first.radius >= RADIUS_BAND.0 && first.radius < RADIUS_BAND.1);

        for p in &packing.placements[1..] {
            assert!(p.attempt > 1);
            assert!(p.radius >= TOPUP_RADIUS_BAND.0 && p.radius < TOPUP_RADIUS_BAND.1,
                    "top-up radius out of band: {:?}", p);
            assert_eq!(p.min_overlap, OVERLAP_START * TOPUP_OVERLAP_FACTOR);
        }

        assert_separated(&packing.placements);

    }

    #[test]
    fn packing_terminates_on_tiny_canvas() {

        let params = PackingParams {
            half_dims: Vec2d::new(0.05, 0.05),
            ..PackingParams::default()
        };

        let mut rng = StdRng::seed_from_u64(77);
        let packing = pack_motifs(&params, &mut rng);

        assert!(packing.attempts <= MAX_TOTAL_TRIES);
        assert!(packing.placements.len() < MIN_MOTIFS);
        assert_separated(&packing.placements);

    }

    //////////////////////////////////////////////////////////////////////
    // composer

    #[test]
    fn no_hints_means_no_text_and_no_legend() {

        for (seed, &style) in STYLES.iter().enumerate() {

            let mut rng = StdRng::seed_from_u64(seed as u64);
            let (art, legend) = compose(&config(HintMode::None, style), &mut rng).unwrap();

            assert!(!art.shapes.is_empty());
            assert!(art.annotations.is_empty());
            assert!(legend.is_none());

        }

    }

    #[test]
    fn number_hints_form_contiguous_bijective_legend() {

        for seed in 0..6 {

            for &style in &STYLES {

                let mut rng = StdRng::seed_from_u64(100 + seed);
                let (art, legend) = compose(&config(HintMode::Number, style), &mut rng).unwrap();

                if art.annotations.is_empty() {
                    assert!(legend.is_none());
                    continue;
                }

                let legend = legend.expect("number mode with hints has a legend");

                let numbers: Vec<usize> = legend.iter().map(|(n, _)| *n).collect();
                let expected: Vec<usize> = (1..=legend.len()).collect();
                assert_eq!(numbers, expected);

                let names: HashSet<&str> = legend.iter().map(|(_, s)| s.as_str()).collect();
                assert_eq!(names.len(), legend.len());
                assert!(names.iter().all(|n| BASIC_COLORS.contains(n)));

                // every number drawn on the page resolves through the legend
                // and every legend entry appears on the page
                let used: HashSet<usize> = art.annotations.iter()
                    .map(|a| a.text.parse::<usize>().unwrap())
                    .collect();

                assert_eq!(used, numbers.iter().copied().collect::<HashSet<usize>>());

            }

        }

    }

    #[test]
    fn name_hints_write_palette_names() {

        let mut rng = StdRng::seed_from_u64(21);

        let cfg = GenerationConfig {
            palette: Palette::Advanced,
            ..config(HintMode::Name, CompositionStyle::EasyStructured)
        };

        let (art, legend) = compose(&cfg, &mut rng).unwrap();

        assert!(!art.annotations.is_empty());
        assert!(art.annotations.iter().all(|a| ADVANCED_COLORS.contains(&a.text.as_str())));
        assert!(legend.is_none());

    }

    #[test]
    fn single_pattern_styles_reject_bad_max_radius() {

        for &style in &STYLES[1..] {

            let mut rng = StdRng::seed_from_u64(4);
            let cfg = GenerationConfig { max_radius: 0.0, ..config(HintMode::None, style) };

            assert!(is_generation_error(&compose(&cfg, &mut rng).unwrap_err()));

        }

        // free-form ignores max_radius
        let mut rng = StdRng::seed_from_u64(4);
        let cfg = GenerationConfig {
            max_radius: 0.0,
            ..config(HintMode::None, CompositionStyle::FreeForm)
        };

        assert!(compose(&cfg, &mut rng).is_ok());

    }

    //////////////////////////////////////////////////////////////////////
    // rasterizing and page layout

    #[test]
    fn trim_transparent_crops_to_content() {

        let mut img = image::RgbaImage::new(10, 8);
        img.put_pixel(3, 2, image::Rgba([0, 0, 0, 255]));
        img.put_pixel(6, 5, image::Rgba([0, 0, 0, 128]));

        let trimmed = trim_transparent(&img);

        assert_eq!(trimmed.dimensions(), (4, 4));
        assert_eq!(trimmed.get_pixel(0, 0).0[3], 255);
        assert_eq!(trimmed.get_pixel(3, 3).0[3], 128);

    }

    #[test]
    fn legend_rows_wrap_after_five_entries() {
        assert_eq!(legend_rows(1), 2);
        assert_eq!(legend_rows(5), 2);
        assert_eq!(legend_rows(6), 3);
        assert_eq!(legend_rows(11), 4);
    }

    #[test]
    fn easy_mandala_end_to_end() {

        let dir = scratch_dir("easy");
        let image_path = dir.join(MANDALA_IMAGE);

        let cfg = GenerationConfig {
            hint_mode: HintMode::Number,
            palette: Palette::Basic,
            style: CompositionStyle::EasyStructured,
            max_radius: 1.4
        };

        let mut rng = StdRng::seed_from_u64(2024);
        let legend = generate(&cfg, &image_path, &mut rng).unwrap()
            .expect("easy mandala always carries hints");

        let numbers: Vec<usize> = legend.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, (1..=legend.len()).collect::<Vec<usize>>());
        assert!(legend.iter().all(|(_, name)| BASIC_COLORS.contains(&name.as_str())));

        let img = image::open(&image_path).unwrap().to_rgba8();

        let alphas: Vec<u8> = img.pixels().map(|p| p.0[3]).collect();
        assert!(alphas.iter().any(|&a| a == 0), "background is transparent");
        assert!(alphas.iter().any(|&a| a == 255), "something was drawn");

        // trimmed: content touches every border
        let (w, h) = img.dimensions();
        assert!((0..h).any(|y| img.get_pixel(0, y).0[3] > 0));
        assert!((0..h).any(|y| img.get_pixel(w - 1, y).0[3] > 0));
        assert!((0..w).any(|x| img.get_pixel(x, 0).0[3] > 0));
        assert!((0..w).any(|x| img.get_pixel(x, h - 1).0[3] > 0));

        let pdf_path = dir.join("output1.pdf");
        write_page(&image_path, Some(legend.as_slice()), &pdf_path).unwrap();

        let bytes = std::fs::read(&pdf_path).unwrap();
        assert!(bytes.starts_with(b"%PDF"));

        let _ = std::fs::remove_dir_all(&dir);

    }

    #[test]
    fn free_form_page_without_legend() {

        let dir = scratch_dir("free_form");
        let output_dir = dir.join(OUTPUT_DIR);
        let image_path = dir.join(MANDALA_IMAGE);

        ensure_dirs(&[output_dir.as_path()]).unwrap();

        let mut rng = StdRng::seed_from_u64(8);
        let cfg = config(HintMode::Name, CompositionStyle::FreeForm);

        let first = make_page(&cfg, &image_path, &output_dir, &mut rng).unwrap();
        let second = make_page(&cfg, &image_path, &output_dir, &mut rng).unwrap();

        assert_eq!(first, output_dir.join("output1.pdf"));
        assert_eq!(second, output_dir.join("output2.pdf"));
        assert!(second.exists());

        let _ = std::fs::remove_dir_all(&dir);

    }

    #[test]
    fn batch_skips_failed_generation() {

        let dir = scratch_dir("batch_skip");
        let tmp = dir.join(TMP_DIR);
        let output_dir = dir.join(OUTPUT_DIR);

        // zero radius is rejected for the easy style on every page
        let cfg = GenerationConfig {
            max_radius: 0.0,
            ..config(HintMode::Number, CompositionStyle::EasyStructured)
        };

        let mut rng = StdRng::seed_from_u64(6);
        let written = run_batch(&cfg, 3, &tmp, &output_dir, &mut rng).unwrap();

        assert_eq!(written, 0);
        assert!(!tmp.exists());
        assert_eq!(std::fs::read_dir(&output_dir).unwrap().count(), 0);

        let _ = std::fs::remove_dir_all(&dir);

    }

    #[test]
    fn batch_stops_on_output_failure() {

        let dir = scratch_dir("batch_stop");
        let tmp = dir.join(TMP_DIR);

        // a plain file where the output directory should go
        let output_dir = dir.join(OUTPUT_DIR);
        std::fs::write(&output_dir, b"").unwrap();

        let mut rng = StdRng::seed_from_u64(6);
        let cfg = config(HintMode::None, CompositionStyle::EasyStructured);

        let err = run_batch(&cfg, 2, &tmp, &output_dir, &mut rng).unwrap_err();
        assert!(!is_generation_error(&err));

        // missing output directory: the page number lookup fails
        let mut rng = StdRng::seed_from_u64(6);
        let err = make_page(&cfg, &dir.join(MANDALA_IMAGE),
                            &dir.join("missing"), &mut rng).unwrap_err();
        assert!(!is_generation_error(&err));

        let _ = std::fs::remove_dir_all(&dir);

    }

    #[test]
    fn choice_from_empty_list_is_an_error() {

        let mut rng = StdRng::seed_from_u64(0);
        let empty: [usize; 0] = [];

        assert!(is_generation_error(&rng.choice(&empty).unwrap_err()));
        assert_eq!(*rng.choice(&[7]).unwrap(), 7);

    }

    //////////////////////////////////////////////////////////////////////
    // settings and bookkeeping

    #[test]
    fn settings_map_to_generation_config() {

        let settings = Settings {
            color_hint_mode: Some("number".to_string()),
            color_mode: "advanced".to_string(),
            batch_count: 3,
            mandala_style: "easy_mandala".to_string(),
            mandala_max_radius: 1.42,
            write_color_names: None
        };

        assert_eq!(settings.generation_config(), GenerationConfig {
            hint_mode: HintMode::Number,
            palette: Palette::Advanced,
            style: CompositionStyle::EasyStructured,
            max_radius: 1.42
        });

        let odd = Settings {
            color_hint_mode: Some("shout".to_string()),
            color_mode: "neon".to_string(),
            mandala_style: "cubist".to_string(),
            ..Settings::default()
        };

        assert_eq!(odd.generation_config(), GenerationConfig::default());

    }

    #[test]
    fn legacy_settings_are_converted() {

        let dir = scratch_dir("legacy");
        let path = dir.join(CONFIG_FILE);

        std::fs::write(&path, r#"{"write_color_names": true, "batch_count": 2}"#).unwrap();
        let settings = Settings::load(&path).unwrap();

        assert_eq!(settings.color_hint_mode.as_deref(), Some("name"));
        assert_eq!(settings.batch_count, 2);
        assert_eq!(settings.color_mode, "basic");

        std::fs::write(&path, r#"{"mandala_style": "geometric"}"#).unwrap();
        let settings = Settings::load(&path).unwrap();

        assert_eq!(settings.color_hint_mode.as_deref(), Some("none"));
        assert_eq!(settings.generation_config().style, CompositionStyle::GeometricRings);

        let _ = std::fs::remove_dir_all(&dir);

    }

    #[test]
    fn saved_settings_load_back() {

        let dir = scratch_dir("save");
        let path = dir.join(CONFIG_FILE);

        let settings = Settings {
            color_hint_mode: Some("name".to_string()),
            mandala_style: "geometric".to_string(),
            mandala_max_radius: 1.45,
            ..Settings::default()
        };

        settings.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("write_color_names"));

        assert_eq!(Settings::load(&path).unwrap(), settings);

        let _ = std::fs::remove_dir_all(&dir);

    }

    #[test]
    fn interactive_prompt_with_fallbacks() {

        let mut input = Cursor::new("NUMBER\nadvanced\n4\neasy_mandala\n1.44\n");
        let mut output = Vec::new();

        let settings = ask_settings_interactive(&mut input, &mut output).unwrap();

        assert_eq!(settings.color_hint_mode.as_deref(), Some("number"));
        assert_eq!(settings.color_mode, "advanced");
        assert_eq!(settings.batch_count, 4);
        assert_eq!(settings.mandala_style, "easy_mandala");
        assert_relative_eq!(settings.mandala_max_radius, 1.44);

        let prompts = String::from_utf8(output).unwrap();
        assert!(prompts.contains("Max radius"));

        // junk everywhere; random style skips the radius question
        let mut input = Cursor::new("loud\nrainbow\nmany\nwild\n");
        let mut output = Vec::new();

        let settings = ask_settings_interactive(&mut input, &mut output).unwrap();

        assert_eq!(settings.color_hint_mode.as_deref(), Some("none"));
        assert_eq!(settings.color_mode, "basic");
        assert_eq!(settings.batch_count, 1);
        assert_eq!(settings.mandala_style, "random");
        assert_relative_eq!(settings.mandala_max_radius, DEFAULT_MAX_RADIUS);

        assert!(!String::from_utf8(output).unwrap().contains("Max radius"));

    }

    #[test]
    fn output_filenames_fill_gaps() {

        let dir = scratch_dir("names");

        assert_eq!(next_output_filename(&dir).unwrap(), "output1.pdf");

        for name in &["output1.pdf", "output3.pdf", "outputx.pdf", "notes.txt"] {
            std::fs::write(dir.join(name), b"").unwrap();
        }

        assert_eq!(next_output_filename(&dir).unwrap(), "output2.pdf");

        let tmp = dir.join(TMP_DIR);
        ensure_dirs(&[tmp.as_path()]).unwrap();
        assert!(tmp.exists());
        clean_temp(&tmp).unwrap();
        assert!(!tmp.exists());

        let _ = std::fs::remove_dir_all(&dir);

    }

}
