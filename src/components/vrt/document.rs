//! VRT style XML form of a [Vrt].
//!
//! The document is the wire form of a tree: structural edits happen on the
//! typed tree and `to_xml` / `from_xml` convert between the two.

use std::str::FromStr;

use itertools::Itertools;
use quick_xml::{
    events::{BytesEnd, BytesStart, BytesText, Event},
    Reader, Writer,
};

use crate::{
    components::{
        band::{BandSource, DataType, Resampling, ScaleOffset, VirtualBand},
        expression::Expression,
        georef::{Gcp, GeoTransform, Geolocation, Georeference, Grid, GEOLOCATION_DOMAIN},
        metadata::Metadata,
        store::{ArrayHandle, VrtHandle},
        vrt::Vrt,
    },
    errors::{Result, RustervrtError},
};

const DATASET: &str = "VRTDataset";
const BAND: &str = "VRTRasterBand";
const METADATA: &str = "Metadata";
const ITEM: &str = "MDI";
const SRS: &str = "SRS";
const GEO_TRANSFORM: &str = "GeoTransform";
const GCP_LIST: &str = "GCPList";
const GCP: &str = "GCP";
const EXPRESSION: &str = "Expression";
const SIMPLE_SOURCE: &str = "SimpleSource";
const COMPLEX_SOURCE: &str = "ComplexSource";
const AVERAGED_SOURCE: &str = "AveragedSource";
const WARPED_SOURCE: &str = "WarpedSource";
const SOURCES: [&str; 4] = [SIMPLE_SOURCE, COMPLEX_SOURCE, AVERAGED_SOURCE, WARPED_SOURCE];

impl Vrt {
    /// Serializes the tree. Output is deterministic.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        let (width, height) = (self.size().0.to_string(), self.size().1.to_string());
        writer.write_event(Event::Start(BytesStart::new(DATASET).with_attributes([
            ("rasterXSize", width.as_str()),
            ("rasterYSize", height.as_str()),
        ])))?;

        match self.georef() {
            Georeference::Affine {
                transform,
                projection,
            } => {
                text_element(&mut writer, SRS, &[], projection)?;
                let coefficients = transform.to_gdal().iter().map(|c| format!("{c:?}")).join(", ");
                text_element(&mut writer, GEO_TRANSFORM, &[], &coefficients)?;
            }
            Georeference::Gcps { gcps, projection } => {
                writer.write_event(Event::Start(
                    BytesStart::new(GCP_LIST).with_attributes([("Projection", projection.as_str())]),
                ))?;
                for gcp in gcps {
                    let values = [gcp.pixel, gcp.line, gcp.x, gcp.y, gcp.z].map(|v| format!("{v:?}"));
                    writer.write_event(Event::Empty(BytesStart::new(GCP).with_attributes([
                        ("Id", gcp.id.as_str()),
                        ("Pixel", values[0].as_str()),
                        ("Line", values[1].as_str()),
                        ("X", values[2].as_str()),
                        ("Y", values[3].as_str()),
                        ("Z", values[4].as_str()),
                    ])))?;
                }
                writer.write_event(Event::End(BytesEnd::new(GCP_LIST)))?;
            }
        }

        write_metadata(&mut writer, None, self.metadata())?;
        if let Some(geolocation) = self.geolocation() {
            write_metadata(&mut writer, Some(GEOLOCATION_DOMAIN), &geolocation.to_metadata())?;
        }
        for (idx, band) in self.bands().iter().enumerate() {
            write_band(&mut writer, idx + 1, band)?;
        }

        writer.write_event(Event::End(BytesEnd::new(DATASET)))?;
        String::from_utf8(writer.into_inner())
            .map_err(|err| RustervrtError::DocumentError(err.to_string()))
    }

    /// Parses a document written by [Vrt::to_xml].
    pub fn from_xml(xml: &str) -> Result<Vrt> {
        let root = Node::parse(xml)?;
        if root.name != DATASET {
            return Err(RustervrtError::DocumentError(format!(
                "expected {DATASET} root, found {}",
                root.name
            )));
        }
        let size = (
            parse_value(root.required_attribute("rasterXSize")?, "rasterXSize")?,
            parse_value(root.required_attribute("rasterYSize")?, "rasterYSize")?,
        );

        let georef = match root.child(GCP_LIST) {
            Some(list) => Georeference::Gcps {
                gcps: list
                    .children_named(GCP)
                    .map(Node::to_gcp)
                    .collect::<Result<Vec<_>>>()?,
                projection: list.attribute("Projection").unwrap_or_default().to_string(),
            },
            None => Georeference::Affine {
                transform: match root.child(GEO_TRANSFORM) {
                    Some(node) => parse_transform(&node.text)?,
                    None => GeoTransform::default(),
                },
                projection: root.child(SRS).map(|node| node.text.clone()).unwrap_or_default(),
            },
        };

        let mut vrt = Vrt::new(Grid::new(size, georef));
        for node in root.children_named(METADATA) {
            match node.attribute("domain") {
                None => *vrt.metadata_mut() = node.to_metadata(),
                Some(GEOLOCATION_DOMAIN) => {
                    vrt.set_geolocation(Geolocation::from_metadata(&node.to_metadata()))
                }
                Some(_) => (),
            }
        }
        for node in root.children_named(BAND) {
            vrt.push_band(node.to_band()?);
        }
        Ok(vrt)
    }
}

fn text_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    attributes: &[(&str, &str)],
    text: &str,
) -> Result<()> {
    writer.write_event(Event::Start(
        BytesStart::new(name).with_attributes(attributes.iter().copied()),
    ))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_metadata(writer: &mut Writer<Vec<u8>>, domain: Option<&str>, metadata: &Metadata) -> Result<()> {
    let start = match domain {
        Some(domain) => BytesStart::new(METADATA).with_attributes([("domain", domain)]),
        None => BytesStart::new(METADATA),
    };
    if metadata.is_empty() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }
    writer.write_event(Event::Start(start))?;
    for (key, value) in metadata.iter() {
        text_element(writer, ITEM, &[("key", key)], value)?;
    }
    writer.write_event(Event::End(BytesEnd::new(METADATA)))?;
    Ok(())
}

fn source_element(band: &VirtualBand) -> &'static str {
    match (&band.source, band.resampling, band.scale_offset) {
        (BandSource::Warped { .. }, _, _) => WARPED_SOURCE,
        (_, Resampling::Average, _) => AVERAGED_SOURCE,
        (_, _, Some(_)) => COMPLEX_SOURCE,
        _ => SIMPLE_SOURCE,
    }
}

fn write_band(writer: &mut Writer<Vec<u8>>, ordinal: usize, band: &VirtualBand) -> Result<()> {
    let ordinal = ordinal.to_string();
    writer.write_event(Event::Start(BytesStart::new(BAND).with_attributes([
        ("dataType", band.data_type.name()),
        ("band", ordinal.as_str()),
    ])))?;
    write_metadata(writer, None, band.metadata())?;

    let element = source_element(band);
    let mut start = BytesStart::new(element);
    if band.resampling != Resampling::Nearest && element != AVERAGED_SOURCE {
        start.push_attribute(("resampling", band.resampling.name()));
    }
    writer.write_event(Event::Start(start))?;
    match &band.source {
        BandSource::File { path, band } => {
            text_element(writer, "SourceFilename", &[], &path.to_string_lossy())?;
            text_element(writer, "SourceBand", &[], &band.to_string())?;
        }
        BandSource::Tree { handle, band } | BandSource::Warped { handle, band } => {
            text_element(writer, "SourceTree", &[], &handle.0.to_string())?;
            text_element(writer, "SourceBand", &[], &band.to_string())?;
        }
        BandSource::Array(handle) => {
            text_element(writer, "SourceArray", &[], &handle.0.to_string())?;
        }
    }
    if let Some(scale_offset) = band.scale_offset {
        text_element(writer, "ScaleRatio", &[], &format!("{:?}", scale_offset.scale))?;
        text_element(writer, "ScaleOffset", &[], &format!("{:?}", scale_offset.offset))?;
    }
    writer.write_event(Event::End(BytesEnd::new(element)))?;

    if let Some(expression) = &band.expression {
        text_element(writer, EXPRESSION, &[], expression.source())?;
    }
    writer.write_event(Event::End(BytesEnd::new(BAND)))?;
    Ok(())
}

fn parse_value<T: FromStr>(value: &str, what: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| RustervrtError::DocumentError(format!("invalid {what} {value:?}")))
}

fn parse_transform(text: &str) -> Result<GeoTransform> {
    let coefficients: Vec<f64> = text
        .split(',')
        .map(|c| parse_value(c, GEO_TRANSFORM))
        .try_collect()?;
    let coefficients: [f64; 6] = coefficients.try_into().map_err(|_| {
        RustervrtError::DocumentError(format!("{GEO_TRANSFORM} needs 6 coefficients"))
    })?;
    Ok(GeoTransform::from_gdal(coefficients))
}

/// Element of a parsed document.
#[derive(Debug, Default)]
struct Node {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<Node>,
}

impl Node {
    fn parse(xml: &str) -> Result<Node> {
        let mut reader = Reader::from_str(xml);
        let mut open: Vec<Node> = Vec::new();
        let mut root = None;
        loop {
            match reader.read_event()? {
                Event::Start(start) => open.push(Node::from_start(&start)?),
                Event::Empty(start) => {
                    let node = Node::from_start(&start)?;
                    Self::close(&mut open, &mut root, node)?;
                }
                Event::Text(text) => {
                    if let Some(node) = open.last_mut() {
                        node.text.push_str(&text.unescape()?);
                    }
                }
                Event::End(_) => {
                    let node = open.pop().ok_or_else(|| {
                        RustervrtError::DocumentError("unbalanced end tag".to_string())
                    })?;
                    Self::close(&mut open, &mut root, node)?;
                }
                Event::Eof => break,
                _ => (),
            }
        }
        if !open.is_empty() {
            return Err(RustervrtError::DocumentError("unterminated element".to_string()));
        }
        root.ok_or_else(|| RustervrtError::DocumentError("empty document".to_string()))
    }

    fn close(open: &mut [Node], root: &mut Option<Node>, node: Node) -> Result<()> {
        match open.last_mut() {
            Some(parent) => parent.children.push(node),
            None if root.is_none() => *root = Some(node),
            None => {
                return Err(RustervrtError::DocumentError(
                    "more than one root element".to_string(),
                ))
            }
        }
        Ok(())
    }

    fn from_start(start: &BytesStart) -> Result<Node> {
        let attributes = start
            .attributes()
            .map(|attr| -> Result<(String, String)> {
                let attr = attr?;
                Ok((
                    String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                    attr.unescape_value()?.into_owned(),
                ))
            })
            .try_collect()?;
        Ok(Node {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            attributes,
            ..Default::default()
        })
    }

    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    fn required_attribute(&self, key: &str) -> Result<&str> {
        self.attribute(key).ok_or_else(|| {
            RustervrtError::DocumentError(format!("{} lacks attribute {key}", self.name))
        })
    }

    fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|child| child.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Node> {
        self.children.iter().filter(move |child| child.name == name)
    }

    fn child_value<T: FromStr>(&self, name: &str) -> Result<Option<T>> {
        self.child(name)
            .map(|child| parse_value(&child.text, name))
            .transpose()
    }

    fn to_metadata(&self) -> Metadata {
        self.children_named(ITEM)
            .map(|item| (item.attribute("key").unwrap_or_default(), item.text.as_str()))
            .collect()
    }

    fn to_gcp(&self) -> Result<Gcp> {
        let value = |key: &str| -> Result<f64> { parse_value(self.required_attribute(key)?, key) };
        Ok(Gcp {
            id: self.attribute("Id").unwrap_or_default().to_string(),
            pixel: value("Pixel")?,
            line: value("Line")?,
            x: value("X")?,
            y: value("Y")?,
            z: value("Z")?,
        })
    }

    fn to_band(&self) -> Result<VirtualBand> {
        let data_type: DataType = self.required_attribute("dataType")?.parse()?;
        let element = self
            .children
            .iter()
            .find(|child| SOURCES.contains(&child.name.as_str()))
            .ok_or_else(|| RustervrtError::DocumentError(format!("{BAND} without a source")))?;

        let band_number = || -> Result<usize> {
            element.child_value("SourceBand")?.ok_or_else(|| {
                RustervrtError::DocumentError(format!("{} lacks SourceBand", element.name))
            })
        };
        let source = if let Some(path) = element.child("SourceFilename") {
            BandSource::File {
                path: path.text.clone().into(),
                band: band_number()?,
            }
        } else if let Some(handle) = element.child_value::<usize>("SourceTree")? {
            let handle = VrtHandle(handle);
            let band = band_number()?;
            match element.name.as_str() {
                WARPED_SOURCE => BandSource::Warped { handle, band },
                _ => BandSource::Tree { handle, band },
            }
        } else if let Some(handle) = element.child_value::<usize>("SourceArray")? {
            BandSource::Array(ArrayHandle(handle))
        } else {
            return Err(RustervrtError::DocumentError(format!(
                "{} names no source",
                element.name
            )));
        };

        let metadata = self.child(METADATA).map(Node::to_metadata).unwrap_or_default();
        let mut band = VirtualBand::new(source, data_type, metadata);
        band.resampling = match (element.name.as_str(), element.attribute("resampling")) {
            (AVERAGED_SOURCE, _) => Resampling::Average,
            (_, Some(resampling)) => resampling.parse()?,
            (_, None) => Resampling::Nearest,
        };
        let scale: Option<f64> = element.child_value("ScaleRatio")?;
        let offset: Option<f64> = element.child_value("ScaleOffset")?;
        band.scale_offset = (scale.is_some() || offset.is_some()).then(|| ScaleOffset {
            scale: scale.unwrap_or(1.),
            offset: offset.unwrap_or(0.),
        });
        band.expression = self
            .child(EXPRESSION)
            .map(|node| Expression::parse(&node.text))
            .transpose()?;
        Ok(band)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::band_id::BAND_NAME;
    use rstest::{fixture, rstest};

    #[fixture]
    fn tree() -> Vrt {
        let mut vrt = Vrt::new(Grid::affine(
            (4, 3),
            [500000., 10., 0., 6600000., 0., -10.],
            "PROJCS[\"WGS 84 / UTM zone 33N\",AUTHORITY[\"EPSG\",\"32633\"]]",
        ));
        vrt.metadata_mut().insert("sensor", "OLI <TIRS> & co");
        vrt.metadata_mut().insert("empty", "");
        vrt.set_geolocation(Some(Geolocation {
            x_dataset: "lon.tif".into(),
            x_band: 1,
            y_dataset: "lat.tif".into(),
            y_band: 1,
        }));
        vrt.create_band(
            BandSource::File {
                path: "LC8_B1.TIF".into(),
                band: 1,
            },
            DataType::UInt16,
            Metadata::from_iter([(BAND_NAME, "radiance"), ("scale", "0.1")]),
        );
        let averaged = vrt.create_band(
            BandSource::Tree {
                handle: VrtHandle(2),
                band: 1,
            },
            DataType::Float32,
            Metadata::new(),
        );
        vrt.band_mut(averaged).unwrap().resampling = Resampling::Average;
        vrt.create_band(BandSource::Array(ArrayHandle(0)), DataType::Float64, Metadata::new());
        let warped = vrt.create_band(
            BandSource::Warped {
                handle: VrtHandle(5),
                band: 2,
            },
            DataType::Int16,
            Metadata::from_iter([("expression", "sqrt(bandData) * 2")]),
        );
        vrt.band_mut(warped).unwrap().resampling = Resampling::Cubic;
        vrt
    }

    #[rstest]
    fn round_trip_is_byte_identical(tree: Vrt) {
        let xml = tree.to_xml().unwrap();
        let parsed = Vrt::from_xml(&xml).unwrap();
        assert_eq!(parsed, tree);
        assert_eq!(parsed.to_xml().unwrap(), xml);
    }

    #[rstest]
    fn source_elements_follow_band_kind(tree: Vrt) {
        let xml = tree.to_xml().unwrap();
        assert!(xml.contains("<ComplexSource>"));
        assert!(xml.contains("<ScaleRatio>0.1</ScaleRatio>"));
        assert!(xml.contains("<AveragedSource>"));
        assert!(xml.contains("<SimpleSource>"));
        assert!(xml.contains("<WarpedSource resampling=\"cubic\">"));
        assert!(xml.contains("<Expression>sqrt(bandData) * 2</Expression>"));
    }

    #[test]
    fn gcp_trees_round_trip() {
        let mut vrt = Vrt::new(Grid::new(
            (10, 20),
            Georeference::Gcps {
                gcps: vec![
                    Gcp {
                        id: "1".into(),
                        pixel: 0.5,
                        line: 0.5,
                        x: 5.25,
                        y: 60.125,
                        z: 0.,
                    },
                    Gcp {
                        id: "2".into(),
                        pixel: 9.5,
                        line: 19.5,
                        x: 6.,
                        y: 61.,
                        z: 12.,
                    },
                ],
                projection: "EPSG:4326".into(),
            },
        ));
        vrt.create_band(
            BandSource::File {
                path: "swath.nc".into(),
                band: 3,
            },
            DataType::Float32,
            Metadata::new(),
        );
        let xml = vrt.to_xml().unwrap();
        let parsed = Vrt::from_xml(&xml).unwrap();
        assert_eq!(parsed, vrt);
        assert_eq!(parsed.to_xml().unwrap(), xml);
    }

    #[rstest]
    #[case("")]
    #[case("<Dataset rasterXSize=\"1\" rasterYSize=\"1\"/>")]
    #[case("<VRTDataset rasterXSize=\"x\" rasterYSize=\"1\"/>")]
    #[case("<VRTDataset rasterXSize=\"1\" rasterYSize=\"1\"><VRTRasterBand dataType=\"Byte\" band=\"1\"/></VRTDataset>")]
    #[case("<VRTDataset rasterXSize=\"1\" rasterYSize=\"1\"><GeoTransform>0, 1, 0</GeoTransform></VRTDataset>")]
    fn malformed_documents_are_rejected(#[case] xml: &str) {
        assert!(Vrt::from_xml(xml).is_err());
    }
}
