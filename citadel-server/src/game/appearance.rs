//! Team Color and Highlight
//!
//! Two replicated visual parameters per unit. Changes are not inherited by
//! child visuals: every change is pushed to the unit itself and then to each
//! direct child attachment through a [`MaterialSink`].

use serde::{Serialize, Deserialize};

use crate::game::state::UnitId;

/// Team color, one per side of the match.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ColorId {
    /// First team.
    #[default]
    First = 0,
    /// Second team.
    Second = 1,
}

impl ColorId {
    /// Numeric material parameter: 0 for the first team, 1 for the second.
    #[inline]
    pub fn material_param(self) -> f32 {
        match self {
            ColorId::First => 0.0,
            ColorId::Second => 1.0,
        }
    }

    /// Wire index.
    #[inline]
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Get color from index (0-1).
    pub fn from_index(index: u8) -> Option<ColorId> {
        match index {
            0 => Some(ColorId::First),
            1 => Some(ColorId::Second),
            _ => None,
        }
    }
}

/// Parameter pair handed to the rendering collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaterialParams {
    /// Team color parameter (0.0 or 1.0).
    pub color: f32,
    /// Highlight parameter (0.0 or 1.0).
    pub highlighted: f32,
}

/// Visual receiving a material update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VisualTarget {
    /// The unit's own visual.
    Unit(UnitId),
    /// A direct child attachment of the unit.
    Child {
        /// Parent unit.
        unit: UnitId,
        /// Child slot (0-based).
        index: u16,
    },
}

/// Rendering/material collaborator.
pub trait MaterialSink {
    /// Apply parameters to one visual.
    fn apply(&mut self, target: VisualTarget, params: MaterialParams);
}

/// Sink for headless processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MaterialSink for NullSink {
    fn apply(&mut self, _target: VisualTarget, _params: MaterialParams) {}
}

/// Replicated visual state of a unit.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Appearance {
    /// Team color.
    pub color: ColorId,
    /// Highlight flag. Presentation only, still replicated.
    pub highlighted: bool,
    /// Number of direct child visuals that receive the same parameters.
    pub child_visuals: u16,
}

impl Appearance {
    /// Create a new appearance, not highlighted.
    pub fn new(color: ColorId, child_visuals: u16) -> Self {
        Self {
            color,
            highlighted: false,
            child_visuals,
        }
    }

    /// Current parameter pair.
    pub fn params(&self) -> MaterialParams {
        MaterialParams {
            color: self.color.material_param(),
            highlighted: if self.highlighted { 1.0 } else { 0.0 },
        }
    }

    /// Set the color value. Returns true if it changed.
    pub fn set_color(&mut self, color: ColorId) -> bool {
        let changed = self.color != color;
        self.color = color;
        changed
    }

    /// Set the highlight value. Returns true if it changed.
    pub fn set_highlighted(&mut self, highlighted: bool) -> bool {
        let changed = self.highlighted != highlighted;
        self.highlighted = highlighted;
        changed
    }

    /// Set color and push parameters to the unit and all direct children.
    pub fn apply_color(&mut self, unit: UnitId, color: ColorId, sink: &mut dyn MaterialSink) {
        self.set_color(color);
        self.broadcast(unit, sink);
    }

    /// Set highlight and push parameters to the unit and all direct children.
    pub fn apply_highlighted(&mut self, unit: UnitId, highlighted: bool, sink: &mut dyn MaterialSink) {
        self.set_highlighted(highlighted);
        self.broadcast(unit, sink);
    }

    /// Push current parameters to the unit and each direct child.
    pub fn broadcast(&self, unit: UnitId, sink: &mut dyn MaterialSink) {
        let params = self.params();
        sink.apply(VisualTarget::Unit(unit), params);
        for index in 0..self.child_visuals {
            sink.apply(VisualTarget::Child { unit, index }, params);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Sink that records every call, and the last params per target.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub calls: Vec<(VisualTarget, MaterialParams)>,
    }

    impl RecordingSink {
        pub fn last_for(&self, target: VisualTarget) -> Option<MaterialParams> {
            self.calls.iter().rev().find(|(t, _)| *t == target).map(|(_, p)| *p)
        }
    }

    impl MaterialSink for RecordingSink {
        fn apply(&mut self, target: VisualTarget, params: MaterialParams) {
            self.calls.push((target, params));
        }
    }

    #[test]
    fn test_color_param_values() {
        assert_eq!(ColorId::First.material_param(), 0.0);
        assert_eq!(ColorId::Second.material_param(), 1.0);
        assert_eq!(ColorId::from_index(1), Some(ColorId::Second));
        assert_eq!(ColorId::from_index(2), None);
    }

    #[test]
    fn test_no_children_touches_only_self() {
        let mut sink = RecordingSink::default();
        let mut appearance = Appearance::new(ColorId::First, 0);

        appearance.apply_color(UnitId(1), ColorId::Second, &mut sink);

        assert_eq!(sink.calls.len(), 1);
        assert_eq!(sink.calls[0].0, VisualTarget::Unit(UnitId(1)));
        assert_eq!(sink.calls[0].1.color, 1.0);
    }

    #[test]
    fn test_children_receive_same_params() {
        let mut sink = RecordingSink::default();
        let mut appearance = Appearance::new(ColorId::First, 3);

        appearance.apply_color(UnitId(4), ColorId::Second, &mut sink);

        // N children + the unit itself
        assert_eq!(sink.calls.len(), 4);
        assert!(sink.calls.iter().all(|(_, p)| p.color == 1.0 && p.highlighted == 0.0));
        assert_eq!(
            sink.calls[3].0,
            VisualTarget::Child { unit: UnitId(4), index: 2 }
        );
    }

    #[test]
    fn test_set_color_twice_is_idempotent() {
        let mut once = RecordingSink::default();
        let mut twice = RecordingSink::default();
        let mut a = Appearance::new(ColorId::First, 2);
        let mut b = Appearance::new(ColorId::First, 2);

        a.apply_color(UnitId(1), ColorId::Second, &mut once);
        b.apply_color(UnitId(1), ColorId::Second, &mut twice);
        b.apply_color(UnitId(1), ColorId::Second, &mut twice);

        assert_eq!(a, b);
        for target in [
            VisualTarget::Unit(UnitId(1)),
            VisualTarget::Child { unit: UnitId(1), index: 0 },
            VisualTarget::Child { unit: UnitId(1), index: 1 },
        ] {
            assert_eq!(once.last_for(target), twice.last_for(target));
        }
    }

    #[test]
    fn test_highlight_keeps_color() {
        let mut sink = RecordingSink::default();
        let mut appearance = Appearance::new(ColorId::Second, 1);

        appearance.apply_highlighted(UnitId(2), true, &mut sink);

        assert_eq!(sink.calls.len(), 2);
        for (_, params) in &sink.calls {
            assert_eq!(params.color, 1.0);
            assert_eq!(params.highlighted, 1.0);
        }
        assert!(!appearance.set_highlighted(true));
    }
}
