//! Text form of filters.
//!
//! ```text
//! filter   := term ( ',' term )*
//! term     := [ '!' | '?' ] operand ( '|' operand )*
//! operand  := [ source '.' ] name
//! source   := 'CONTAINER' | 'PREFAB' | 'ID'
//! ```
//!
//! Names are resolved through the world's type registry: component type names (`Position`),
//! names given with `TypeRegistry::register_name`, and the builtin `Prefab` tag. Alternatives of
//! an `Or` term must share one source and cannot be combined with `!` or `?`. `ID.` terms pass
//! the named entity to the callback without matching on it, and take a single plain name.

use std::fmt::Write;

use crate::ecs::{
    entity::Entity,
    error::{Error, Result},
    query::{Filter, Oper, Source, Term},
    world::{TypeRegistry, World},
};

const CONTAINER: &str = "CONTAINER";
const PREFAB: &str = "PREFAB";
const HANDLE: &str = "ID";

impl Filter {
    /// Parse a filter expression, resolving names against `world`.
    pub fn parse(expr: &str, world: &World) -> Result<Filter> {
        let fail = |reason: String| Error::Parse {
            expr: expr.to_string(),
            reason,
        };

        let mut filter = Filter::new();
        if expr.trim().is_empty() {
            return Ok(filter);
        }
        for (index, text) in expr.split(',').enumerate() {
            let term = parse_term(text.trim(), world.types())
                .map_err(|reason| fail(format!("term {index}: {reason}")))?;
            filter.push(term);
        }
        Ok(filter)
    }

    /// Write the filter back in its text form. Entities without a registered name are written
    /// as `#<bits>`, and fixed entity sources as `#<bits>.`; neither parses back.
    pub fn to_expr(&self, types: &TypeRegistry) -> String {
        let mut out = String::new();
        for (index, term) in self.terms().iter().enumerate() {
            if index > 0 {
                out.push_str(", ");
            }
            match term.oper() {
                Oper::Not => out.push('!'),
                Oper::Optional => out.push('?'),
                Oper::And | Oper::Or => {}
            }
            for (alt, component) in term.components().iter().enumerate() {
                if alt > 0 {
                    out.push_str(" | ");
                }
                match term.source() {
                    Source::Container => out.push_str("CONTAINER."),
                    Source::Prefab => out.push_str("PREFAB."),
                    Source::Handle => out.push_str("ID."),
                    Source::Entity(entity) => {
                        let _ = write!(out, "#{}.", entity.to_bits());
                    }
                    Source::Owned => {}
                }
                match types.name_of(*component) {
                    Some(name) => out.push_str(&name),
                    None => {
                        let _ = write!(out, "#{}", component.to_bits());
                    }
                }
            }
        }
        out
    }
}

fn parse_term(text: &str, types: &TypeRegistry) -> std::result::Result<Term, String> {
    let (oper, body) = match text.as_bytes().first() {
        Some(b'!') => (Oper::Not, &text[1..]),
        Some(b'?') => (Oper::Optional, &text[1..]),
        Some(_) => (Oper::And, text),
        None => return Err("empty term".into()),
    };

    let mut source = None;
    let mut components = Vec::new();
    for operand in body.split('|') {
        let (operand_source, component) = parse_operand(operand.trim(), types)?;
        match source {
            None => source = Some(operand_source),
            Some(first) if first != operand_source => {
                return Err("alternatives of an or term must share a source".into());
            }
            Some(_) => {}
        }
        components.push(component);
    }

    let source = source.unwrap_or(Source::Owned);
    if source == Source::Handle && (oper != Oper::And || components.len() > 1) {
        return Err("'ID.' takes a single name without operators".into());
    }
    let term = if components.len() > 1 {
        if oper != Oper::And {
            return Err("'!' and '?' cannot be combined with '|'".into());
        }
        Term::or(components)
    } else {
        match oper {
            Oper::Not => Term::not(components[0]),
            Oper::Optional => Term::optional(components[0]),
            Oper::And | Oper::Or => Term::new(components[0]),
        }
    };
    Ok(term.from(source))
}

fn parse_operand(text: &str, types: &TypeRegistry) -> std::result::Result<(Source, Entity), String> {
    let (source, name) = match text.split_once('.') {
        Some((CONTAINER, name)) => (Source::Container, name.trim()),
        Some((PREFAB, name)) => (Source::Prefab, name.trim()),
        Some((HANDLE, name)) => (Source::Handle, name.trim()),
        Some((other, _)) => return Err(format!("unknown source '{other}'")),
        None => (Source::Owned, text),
    };
    if name.is_empty() {
        return Err("missing component name".into());
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(format!("invalid name '{name}'"));
    }
    let component = types
        .lookup(name)
        .ok_or_else(|| format!("unknown component '{name}'"))?;
    Ok((source, component))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::Component;

    #[derive(Debug, Default, Clone)]
    struct Position(f32);
    impl Component for Position {}

    #[derive(Debug, Default, Clone)]
    struct Velocity(f32);
    impl Component for Velocity {}

    #[derive(Debug, Default, Clone)]
    struct Mass(f32);
    impl Component for Mass {}

    fn world() -> World {
        let world = World::new();
        world.component::<Position>();
        world.component::<Velocity>();
        world.component::<Mass>();
        world
    }

    #[test]
    fn parses_operators_and_sources() {
        // Given
        let world = world();
        let (position, velocity, mass) = (
            world.component::<Position>(),
            world.component::<Velocity>(),
            world.component::<Mass>(),
        );

        // When
        let filter = Filter::parse(
            "Position, !Velocity, ?PREFAB.Mass, CONTAINER.Mass | CONTAINER.Velocity, Prefab, ID.Mass",
            &world,
        )
        .unwrap();

        // Then
        assert_eq!(
            filter,
            Filter::new()
                .with(Term::new(position))
                .with(Term::not(velocity))
                .with(Term::optional(mass).from(Source::Prefab))
                .with(Term::or([mass, velocity]).from(Source::Container))
                .with(Term::new(world.prefab_tag()))
                .with(Term::new(mass).from(Source::Handle))
        );
    }

    #[test]
    fn text_form_round_trips() {
        let world = world();
        let expr = "Position, !Velocity, ?PREFAB.Mass, CONTAINER.Mass | CONTAINER.Position, ID.Mass";

        let filter = Filter::parse(expr, &world).unwrap();

        assert_eq!(filter.to_expr(world.types()), expr);
        assert_eq!(
            Filter::parse(&filter.to_expr(world.types()), &world).unwrap(),
            filter
        );
    }

    #[test]
    fn fixed_entity_sources_do_not_parse_back() {
        // Given
        let world = world();
        let singleton = world.allocator().alloc();
        let filter = Filter::new()
            .with(Term::new(world.component::<Position>()))
            .with(Term::new(world.component::<Mass>()).from(Source::Entity(singleton)));

        // When
        let expr = filter.to_expr(world.types());

        // Then
        assert_eq!(expr, format!("Position, #{}.Mass", singleton.to_bits()));
        assert!(matches!(
            Filter::parse(&expr, &world),
            Err(Error::Parse { .. })
        ));
    }

    #[test]
    fn empty_expression_is_an_empty_filter() {
        let world = world();
        assert!(Filter::parse("  ", &world).unwrap().is_empty());
    }

    #[test]
    fn reports_errors() {
        let world = world();
        let reason = |expr: &str| match Filter::parse(expr, &world) {
            Err(Error::Parse { reason, .. }) => reason,
            other => panic!("expected a parse error, got {other:?}"),
        };

        assert_eq!(reason("Position, Health"), "term 1: unknown component 'Health'");
        assert_eq!(reason("Position,,Mass"), "term 1: empty term");
        assert_eq!(reason("!Position | Mass"), "term 0: '!' and '?' cannot be combined with '|'");
        assert_eq!(
            reason("CONTAINER.Mass | Mass"),
            "term 0: alternatives of an or term must share a source"
        );
        assert_eq!(reason("PARENT.Mass"), "term 0: unknown source 'PARENT'");
        assert_eq!(reason("CONTAINER."), "term 0: missing component name");
        assert_eq!(reason("Pos-ition"), "term 0: invalid name 'Pos-ition'");
        assert_eq!(
            reason("Position, !ID.Mass"),
            "term 1: 'ID.' takes a single name without operators"
        );
    }
}
