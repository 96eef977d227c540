//! Depth sorted fragment chains.
//!
//! Every (sub)pixel owns a singly linked chain of fragments ordered front to
//! back. Chains of one scanline share an arena and link through `u32` handles,
//! and all of them end at the background sentinel.

use glam::{Mat4, Vec3};
use std::fmt;
use std::sync::Arc;

use crate::math::Rgbe;
use crate::scene::VolumeMaterial;

pub type FragmentId = u32;

/// Handle of the background sentinel which terminates every chain
pub const BACKGROUND: FragmentId = u32::MAX;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FragmentKind {
    Opaque,
    Translucent,
    /// The view ray enters the volumetric material of an object
    MaterialEntry,
    /// The view ray leaves the volumetric material of an object
    MaterialExit,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Fragment {
    /// Light added by this surface
    pub additive: Rgbe,
    /// Filter applied to everything behind it, black for opaque surfaces
    pub multiplicative: Rgbe,
    /// View space z
    pub depth: f32,
    pub kind: FragmentKind,
    /// Handle into the per-render material table for entry and exit events
    pub material: Option<u32>,
    pub next: FragmentId,
}

impl Fragment {
    /// What the compositor sees at the end of every chain
    pub const BACKGROUND: Fragment = Fragment {
        additive: Rgbe::ZERO,
        multiplicative: Rgbe::ZERO,
        depth: f32::MAX,
        kind: FragmentKind::Opaque,
        material: None,
        next: BACKGROUND,
    };

    /// Surface fragment, opaque when `multiplicative` is black
    pub fn new(additive: Vec3, multiplicative: Vec3, depth: f32) -> Self {
        let multiplicative = Rgbe::from_vec3(multiplicative);
        let kind = if multiplicative.is_black() {
            FragmentKind::Opaque
        } else {
            FragmentKind::Translucent
        };
        Self {
            additive: Rgbe::from_vec3(additive),
            multiplicative,
            depth,
            kind,
            material: None,
            next: BACKGROUND,
        }
    }

    /// Turns a see-through fragment into an entry or exit event of `material`.
    /// Opaque fragments stay opaque, nothing behind them is ever seen.
    pub fn with_material(mut self, kind: FragmentKind, material: u32) -> Self {
        if self.kind != FragmentKind::Opaque {
            self.kind = kind;
            self.material = Some(material);
        }
        self
    }

    #[inline]
    pub fn is_opaque(&self) -> bool {
        self.kind == FragmentKind::Opaque
    }

    /// True if this fragment goes in front of `other` in a chain.
    ///
    /// Equal depths keep insertion order, except that entering a material
    /// goes before leaving the same material so the gap between them is empty.
    #[inline]
    pub fn precedes(&self, other: &Fragment) -> bool {
        self.depth < other.depth
            || (self.depth == other.depth
                && self.kind == FragmentKind::MaterialEntry
                && other.kind == FragmentKind::MaterialExit
                && self.material == other.material)
    }
}

/// Volumetric material of one object together with the matrix taking view
/// space points into the material's local space
#[derive(Clone)]
pub struct ObjectMaterialInfo {
    pub material: Arc<dyn VolumeMaterial>,
    pub to_local: Mat4,
}

impl fmt::Debug for ObjectMaterialInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectMaterialInfo")
            .field("uniform", &self.material.is_uniform())
            .field("to_local", &self.to_local)
            .finish()
    }
}

/// The fragment chains of one scanline
#[derive(Clone, Debug)]
pub struct FragmentRow {
    heads: Vec<FragmentId>,
    arena: Vec<Fragment>,
    free: Vec<FragmentId>,
}

impl FragmentRow {
    pub fn new(width: usize) -> Self {
        Self {
            heads: vec![BACKGROUND; width],
            arena: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn width(&self) -> usize {
        self.heads.len()
    }

    /// Fragments currently linked into a chain
    pub fn len(&self) -> usize {
        self.arena.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn get(&self, id: FragmentId) -> &Fragment {
        if id == BACKGROUND {
            &Fragment::BACKGROUND
        } else {
            &self.arena[id as usize]
        }
    }

    /// Frontmost fragment at `x`, if any
    pub fn front(&self, x: usize) -> Option<&Fragment> {
        let head = self.heads[x];
        (head != BACKGROUND).then(|| &self.arena[head as usize])
    }

    /// Fragments at `x` front to back, without the background sentinel
    pub fn chain(&self, x: usize) -> Chain<'_> {
        Chain {
            row: self,
            current: self.heads[x],
        }
    }

    /// Links `fragment` into the chain at `x`.
    ///
    /// Returns false when an opaque fragment in front of it hides it.
    pub fn insert(&mut self, x: usize, mut fragment: Fragment) -> bool {
        let mut previous = None;
        let mut current = self.heads[x];
        while current != BACKGROUND {
            let existing = &self.arena[current as usize];
            if fragment.precedes(existing) {
                break;
            }
            if existing.is_opaque() {
                return false;
            }
            previous = Some(current);
            current = existing.next;
        }

        // Nothing behind an opaque fragment can be seen
        fragment.next = if fragment.is_opaque() {
            self.release_chain(current);
            BACKGROUND
        } else {
            current
        };

        let id = self.allocate(fragment);
        match previous {
            Some(previous) => self.arena[previous as usize].next = id,
            None => self.heads[x] = id,
        }
        true
    }

    /// Returns a chain starting at `id` to the free list
    pub fn release_chain(&mut self, mut id: FragmentId) {
        while id != BACKGROUND {
            self.free.push(id);
            id = self.arena[id as usize].next;
        }
    }

    fn allocate(&mut self, fragment: Fragment) -> FragmentId {
        if let Some(id) = self.free.pop() {
            self.arena[id as usize] = fragment;
            id
        } else {
            self.arena.push(fragment);
            (self.arena.len() - 1) as FragmentId
        }
    }
}

pub struct Chain<'a> {
    row: &'a FragmentRow,
    current: FragmentId,
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a Fragment;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current == BACKGROUND {
            return None;
        }
        let fragment = &self.row.arena[self.current as usize];
        self.current = fragment.next;
        Some(fragment)
    }
}
