use kmlfix_core::xml::{NodeId, XmlDocument, XmlNode};
use quick_xml::Writer;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesPI, BytesStart, BytesText, Event};

use crate::IoError;

/// 按文档顺序写回全部节点。解析得到的文本与属性原样输出，仅程序写入的文本会被转义。
pub(crate) fn serialize(document: &XmlDocument) -> Result<String, IoError> {
    let mut writer = Writer::new(Vec::new());
    for id in document.top_level() {
        write_node(&mut writer, document, id)?;
    }
    String::from_utf8(writer.into_inner())
        .map_err(|err| IoError::SerializeError(format!("输出不是合法 UTF-8: {err}")))
}

fn write_node(
    writer: &mut Writer<Vec<u8>>,
    document: &XmlDocument,
    id: NodeId,
) -> Result<(), IoError> {
    let node = document
        .node(id)
        .ok_or_else(|| IoError::SerializeError(format!("节点 {} 不存在", id.get())))?;
    match node {
        XmlNode::Element(element) => {
            let content = format!("{}{}", element.name, element.raw_attributes);
            let start = BytesStart::from_content(content, element.name.len());
            if element.self_closing && element.children.is_empty() {
                emit(writer, Event::Empty(start))?;
            } else {
                emit(writer, Event::Start(start))?;
                for child in &element.children {
                    write_node(writer, document, *child)?;
                }
                match &element.raw_end {
                    Some(raw_end) => writer.get_mut().extend_from_slice(raw_end.as_bytes()),
                    None => emit(writer, Event::End(BytesEnd::new(element.name.as_str())))?,
                }
            }
        }
        XmlNode::Text(text) => {
            let event = match &text.raw {
                Some(raw) => BytesText::from_escaped(raw.as_str()),
                None => BytesText::new(&text.value),
            };
            emit(writer, Event::Text(event))?;
        }
        XmlNode::CData(data) => emit(writer, Event::CData(BytesCData::new(data.as_str())))?,
        XmlNode::Comment(comment) => {
            emit(writer, Event::Comment(BytesText::from_escaped(comment.as_str())))?
        }
        XmlNode::Declaration(decl) => {
            // 声明内容以 `xml` 开头
            let start = BytesStart::from_content(decl.as_str(), 3);
            emit(writer, Event::Decl(BytesDecl::from_start(start)))?;
        }
        XmlNode::ProcessingInstruction(pi) => {
            emit(writer, Event::PI(BytesPI::new(pi.as_str())))?
        }
        XmlNode::DocType(markup) => writer.get_mut().extend_from_slice(markup.as_bytes()),
    }
    Ok(())
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), IoError> {
    writer
        .write_event(event)
        .map_err(|err| IoError::SerializeError(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::KmlParser;

    #[test]
    fn untouched_document_is_written_back_verbatim() {
        let source = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
            <!DOCTYPE kml>\n\
            <?pi data?>\n\
            <!-- exported -->\n\
            <kml xmlns=\"http://www.opengis.net/kml/2.2\">\n  \
            <Placemark><name>Caf&#233;</name><description><![CDATA[<b>x</b>]]></description>\
            <Point/></Placemark>\n</kml>\n";
        let doc = KmlParser::new(source).parse().unwrap();
        assert_eq!(serialize(&doc).unwrap(), source);
    }

    #[test]
    fn irregular_markup_whitespace_survives() {
        let source = "<!DOCTYPE   kml  >\n<kml ><Folder\n></Folder\n><name>a&nbsp;b</name ></kml >";
        let doc = KmlParser::new(source).parse().unwrap();
        assert_eq!(serialize(&doc).unwrap(), source);
    }

    #[test]
    fn programmatic_text_is_escaped() {
        let mut doc = KmlParser::new("<SimpleData name=\"T\">old</SimpleData>")
            .parse()
            .unwrap();
        let root = doc.root_element().unwrap();
        doc.set_text_content(root, "A & B - 1").unwrap();
        assert_eq!(
            serialize(&doc).unwrap(),
            "<SimpleData name=\"T\">A &amp; B - 1</SimpleData>"
        );
    }

    #[test]
    fn self_closing_element_gains_end_tag_once_filled() {
        let mut doc = KmlParser::new("<SimpleData name=\"T\"/>").parse().unwrap();
        let root = doc.root_element().unwrap();
        doc.set_text_content(root, "P").unwrap();
        assert_eq!(serialize(&doc).unwrap(), "<SimpleData name=\"T\">P</SimpleData>");
    }
}
