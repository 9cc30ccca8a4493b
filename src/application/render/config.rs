use std::collections::HashSet;

use ammonia::Builder as AmmoniaBuilder;
use comrak::options::Options;

pub(crate) fn default_options() -> Options<'static> {
    let mut options = Options::default();
    configure_extensions(&mut options);
    options
}

/// Allowlist applied to post HTML before it is embedded in feeds.
pub(crate) fn build_feed_sanitizer() -> AmmoniaBuilder<'static> {
    let mut builder = AmmoniaBuilder::default();

    let tags: HashSet<&'static str> = HashSet::from([
        "a",
        "abbr",
        "blockquote",
        "br",
        "code",
        "dd",
        "del",
        "div",
        "dl",
        "dt",
        "em",
        "h1",
        "h2",
        "h3",
        "h4",
        "h5",
        "h6",
        "hr",
        "img",
        "input",
        "li",
        "ol",
        "p",
        "pre",
        "s",
        "section",
        "span",
        "strong",
        "sub",
        "sup",
        "table",
        "tbody",
        "td",
        "th",
        "thead",
        "tr",
        "ul",
    ]);
    builder.tags(tags);

    let generic: HashSet<&'static str> = HashSet::from([
        "class",
        "id",
        "title",
        "data-footnote-ref",
        "data-footnotes",
        "data-footnote-backref",
    ]);
    builder.generic_attributes(generic);

    builder.add_tag_attributes("img", &["alt", "width", "height"]);
    builder.add_tag_attributes("pre", &["lang", "data-controller"]);
    builder.add_tag_attributes("th", &["align"]);
    builder.add_tag_attributes("td", &["align"]);
    builder.add_tag_attributes("input", &["type", "checked", "disabled"]);

    builder
}

fn configure_extensions(options: &mut Options<'static>) {
    let ext = &mut options.extension;
    ext.strikethrough = true;
    ext.tagfilter = true;
    ext.table = true;
    ext.autolink = true;
    ext.tasklist = true;
    ext.footnotes = true;
    ext.header_id_prefix = Some(String::new());

    options.parse.smart = true;

    let render = &mut options.render;
    render.github_pre_lang = true;
    render.hardbreaks = true;
    render.r#unsafe = false;
    render.escaped_char_spans = true;
}
