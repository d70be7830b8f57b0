use super::{Gating, ScanPath, Segment};
use crate::ParseError;
use std::str::FromStr;
use uom::si::f64::Time;
use uom::si::time::second;
use winnow::ascii::{dec_uint, float, multispace0};
use winnow::combinator::{alt, delimited, opt, preceded, separated};
use winnow::error::ContextError;
use winnow::token::{one_of, take_while};
use winnow::Parser;

fn ws<'i, O, P>(inner: P) -> impl Parser<&'i str, O, ContextError>
where
    P: Parser<&'i str, O, ContextError>,
{
    delimited(multispace0, inner, multispace0)
}

fn ident<'i>(input: &mut &'i str) -> winnow::Result<&'i str> {
    (
        one_of(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| {
            c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '-' | '.')
        }),
    )
        .take()
        .parse_next(input)
}

fn number(input: &mut &str) -> winnow::Result<f64> {
    ws(float).parse_next(input)
}

fn steps(input: &mut &str) -> winnow::Result<usize> {
    ws(dec_uint::<_, u32, _>)
        .map(|n| n as usize)
        .parse_next(input)
}

fn line(input: &mut &str) -> winnow::Result<Segment> {
    preceded(
        "Line",
        delimited(
            ws('('),
            (ws(ident), ',', number, ',', number, ',', steps),
            ')',
        ),
    )
    .map(|(axis, _, start, _, stop, _, steps)| Segment::line(axis, start, stop, steps))
    .parse_next(input)
}

fn fixed(input: &mut &str) -> winnow::Result<Segment> {
    preceded(
        "Static",
        delimited(ws('('), (ws(ident), ',', number, ',', steps), ')'),
    )
    .map(|(axis, _, value, _, steps)| Segment::fixed(axis, value, steps))
    .parse_next(input)
}

fn term(input: &mut &str) -> winnow::Result<Segment> {
    (opt(ws('~')), alt((line, fixed)))
        .map(|(snake, segment)| match snake {
            Some(_) => segment.snaked(),
            None => segment,
        })
        .parse_next(input)
}

fn factor(input: &mut &str) -> winnow::Result<Vec<Segment>> {
    alt((
        delimited(ws('('), product, ws(')')),
        ws(term).map(|segment| vec![segment]),
    ))
    .parse_next(input)
}

fn product(input: &mut &str) -> winnow::Result<Vec<Segment>> {
    let groups: Vec<Vec<Segment>> = separated(1.., factor, '*').parse_next(input)?;
    Ok(groups.into_iter().flatten().collect())
}

fn body(input: &mut &str) -> winnow::Result<(f64, Vec<Segment>)> {
    (number, '@', product)
        .map(|(duration, _, segments)| (duration, segments))
        .parse_next(input)
}

fn path(input: &mut &str) -> winnow::Result<(Gating, f64, Vec<Segment>)> {
    alt((
        delimited(ws(("Fly", ws('('))), body, ws(')'))
            .map(|(duration, segments)| (Gating::Position, duration, segments)),
        body.map(|(duration, segments)| (Gating::Time, duration, segments)),
    ))
    .parse_next(input)
}

impl FromStr for ScanPath {
    type Err = ParseError;

    /// Parse a [`ScanPath`] from a scan expression.
    ///
    /// A `Fly(...)` wrapper selects position gating; a bare expression is
    /// time gated. The duration is given in seconds and the deadtime takes
    /// its default.
    ///
    /// # Examples
    ///
    /// ```
    /// use flyseq::geometry::{Gating, ScanPath};
    ///
    /// let path: ScanPath = "Fly(0.1 @ (Line(y, 0, 1, 10) * ~Line(x, 0, 1, 10)))".parse()?;
    /// assert_eq!(path.total_points(), 100);
    /// assert_eq!(path.gating(), Gating::Position);
    /// assert!(path.innermost().is_snaked());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (gating, duration, segments) = path
            .parse(input)
            .map_err(|e| ParseError::from_parse(e, "invalid scan expression starting here"))?;

        segments
            .into_iter()
            .fold(ScanPath::builder(), |builder, segment| builder.segment(segment))
            .duration(Time::new::<second>(duration))
            .gating(gating)
            .build()
            .map_err(|e| ParseError::whole(input, e.to_string()))
    }
}
