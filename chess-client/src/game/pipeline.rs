//! 乐观走子管线
//!
//! 用户走子先经规则库在本地生效，加入着法树并记入待确认队列，然后发往服务器。
//! 不轮到本方时转入预走棋队列。

use std::sync::Arc;

use protocol::{ClientCommand, Fen, Move};
use serde::{Deserialize, Serialize};

use super::{EditPolicy, Game, Notification, PendingBranch, PendingMove, Role};
use crate::error::GameError;
use crate::history::NodeId;
use crate::network::CommandSink;
use crate::oracle::Applied;

/// 分支选择
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchChoice {
    Overwrite,
    NewVariation,
}

/// 用户走子的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// 已发往服务器，等待回显
    Sent,
    /// 已排入预走棋队列
    Premoved,
    /// 规则库拒绝或当前角色不能走子
    Rejected,
    /// 等待用户选择覆盖还是新变着
    AwaitingBranchChoice,
    /// 只在本地着法树生效
    Local,
}

/// 新节点放在哪里
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Placement {
    /// 已有相同后续
    Existing(NodeId),
    Mainline,
    Subvariation,
    /// 删除原后续后作为主线
    Overwrite,
    Ask,
}

impl Game {
    /// 用户走子
    pub fn user_move(&mut self, mv: Move, sink: &mut dyn CommandSink) -> Result<MoveOutcome, GameError> {
        self.pending_branch = None;
        match self.role {
            Role::Observing | Role::ObservingExamined => {
                tracing::debug!("Game {}: cannot move while {:?}", self.id, self.role);
                self.notify(Notification::MoveRejected { mv });
                Ok(MoveOutcome::Rejected)
            }
            Role::PlayingWhite | Role::PlayingBlack | Role::PlayingComputer => {
                let tip = self.history.tip();
                let to_move = Fen::side_to_move(&self.history.get(tip)?.fen).ok();
                if to_move != self.local_side {
                    return Ok(self.premove(mv));
                }
                self.play_from(tip, mv, None, sink)
            }
            Role::Examining | Role::None => {
                let cursor = self.history.cursor();
                self.play_from(cursor, mv, None, sink)
            }
        }
    }

    /// 回答分支选择
    pub fn choose_branch(
        &mut self,
        choice: BranchChoice,
        sink: &mut dyn CommandSink,
    ) -> Result<MoveOutcome, GameError> {
        match self.pending_branch.take() {
            None => Err(GameError::NoBranchPending),
            Some(PendingBranch::Local { base, mv }) => self.play_from(base, mv, Some(choice), sink),
            Some(PendingBranch::Server { node }) => {
                if choice == BranchChoice::Overwrite && self.history.contains(node) {
                    let old = self
                        .history
                        .get(node)?
                        .parent
                        .and_then(|p| self.history.node(p))
                        .and_then(|p| p.mainline_next);
                    self.history.make_continuation(node)?;
                    if let Some(old) = old {
                        if self.history.is_ancestor(old, self.history.cursor()) {
                            self.show(node)?;
                        }
                        let nodes = self.history.remove(old)?;
                        self.notify(Notification::NodesRemoved { nodes });
                    }
                    self.notify(Notification::NodePromoted { node });
                }
                Ok(MoveOutcome::Local)
            }
        }
    }

    fn play_from(
        &mut self,
        base: NodeId,
        mv: Move,
        choice: Option<BranchChoice>,
        sink: &mut dyn CommandSink,
    ) -> Result<MoveOutcome, GameError> {
        let base_node = self.history.get(base)?;
        let applied = match self.ctx.oracle.apply_move(
            &base_node.fen,
            &mv,
            self.history.initial_fen(),
            self.variant,
            base_node.variant_data.as_deref(),
            false,
        ) {
            Ok(applied) => applied,
            Err(e) => {
                tracing::debug!("Game {}: move {} rejected: {}", self.id, mv.to_uci(), e);
                self.notify(Notification::MoveRejected { mv });
                return Ok(MoveOutcome::Rejected);
            }
        };

        let placement = self.local_placement(base, &applied.fen, choice)?;
        if placement == Placement::Ask {
            self.pending_branch = Some(PendingBranch::Local {
                base,
                mv: applied.mv,
            });
            self.notify(Notification::BranchChoiceRequired { node: base });
            return Ok(MoveOutcome::AwaitingBranchChoice);
        }

        let sends = self.role.can_send_moves();
        if sends {
            if self.pending.is_empty() {
                self.restore_node = Some(self.history.cursor());
            }
            if self.role == Role::Examining {
                self.resync_examine(base, sink)?;
            }
        }

        let node = self.place(base, &applied, placement)?;
        self.show(node)?;
        if !sends {
            return Ok(MoveOutcome::Local);
        }

        self.pending.push_back(PendingMove {
            node,
            fen: applied.fen.clone(),
            created: !matches!(placement, Placement::Existing(_)),
        });
        tracing::debug!("Game {}: sent {}, {} pending", self.id, applied.mv.to_uci(), self.pending.len());
        sink.send_command(ClientCommand::Move(applied.mv));
        Ok(MoveOutcome::Sent)
    }

    /// 本地走子的位置：编辑模式按策略，否则已有不同后续时作为变着
    fn local_placement(
        &self,
        base: NodeId,
        fen: &str,
        choice: Option<BranchChoice>,
    ) -> Result<Placement, GameError> {
        let node = self.history.get(base)?;
        if let Some(existing) = self.history.continuation_of(base, fen) {
            return Ok(Placement::Existing(existing));
        }
        if node.mainline_next.is_none() {
            return Ok(Placement::Mainline);
        }
        Ok(match choice {
            Some(BranchChoice::Overwrite) => Placement::Overwrite,
            Some(BranchChoice::NewVariation) => Placement::Subvariation,
            None if self.history.edit_mode() => match self.ctx.settings.edit_policy {
                EditPolicy::Ask => Placement::Ask,
                EditPolicy::Overwrite => Placement::Overwrite,
                EditPolicy::NewVariation => Placement::Subvariation,
            },
            None => Placement::Subvariation,
        })
    }

    /// 服务器走子的位置：对弈与观看时覆盖，研究时按策略（询问先作为变着）
    pub(super) fn server_placement(&self, base: NodeId, fen: &str) -> Placement {
        if let Some(existing) = self.history.continuation_of(base, fen) {
            return Placement::Existing(existing);
        }
        let has_next = self
            .history
            .node(base)
            .and_then(|n| n.mainline_next)
            .is_some();
        if !has_next {
            return Placement::Mainline;
        }
        if self.role != Role::Examining {
            return Placement::Overwrite;
        }
        match self.ctx.settings.edit_policy {
            EditPolicy::Overwrite => Placement::Overwrite,
            EditPolicy::Ask | EditPolicy::NewVariation => Placement::Subvariation,
        }
    }

    pub(super) fn place(
        &mut self,
        base: NodeId,
        applied: &Applied,
        placement: Placement,
    ) -> Result<NodeId, GameError> {
        let (node, created) = match placement {
            Placement::Existing(node) => (node, false),
            Placement::Mainline => self.history.add_after(base, applied.mv, &applied.fen, false)?,
            Placement::Subvariation | Placement::Ask => {
                self.history.add_after(base, applied.mv, &applied.fen, true)?
            }
            Placement::Overwrite => {
                let previous = self.history.get(base)?.mainline_next;
                if let Some(old) = previous {
                    if self.history.is_ancestor(old, self.history.cursor()) {
                        self.show(base)?;
                    }
                    let nodes = self.history.remove(old)?;
                    self.notify(Notification::NodesRemoved { nodes });
                }
                self.history.add_after(base, applied.mv, &applied.fen, false)?
            }
        };
        if created {
            self.history.set_variant_data(node, applied.variant_data.clone())?;
            self.notify(Notification::NodeAdded { node });
        }
        Ok(node)
    }

    /// 研究模式下光标与服务器不在同一节点：先后退到公共祖先，再重放到光标
    ///
    /// 每条命令的回显都记入待确认队列。
    fn resync_examine(&mut self, base: NodeId, sink: &mut dyn CommandSink) -> Result<(), GameError> {
        let server = self.server_node;
        if server == base || !self.history.contains(server) {
            return Ok(());
        }

        let anchor = self.history.common_ancestor(server, base);
        let back = self.history.ply(server).saturating_sub(self.history.ply(anchor));
        if back > 0 {
            sink.send_command(ClientCommand::Backward(back as u32));
            let fen = self.history.get(anchor)?.fen.clone();
            self.pending.push_back(PendingMove {
                node: anchor,
                fen,
                created: false,
            });
        }

        let path = self.history.path_from_root(base);
        let start = path
            .iter()
            .position(|id| *id == anchor)
            .map_or(path.len(), |i| i + 1);
        for id in &path[start..] {
            let node = self.history.get(*id)?;
            if let Some(mv) = node.mv {
                let fen = node.fen.clone();
                sink.send_command(ClientCommand::Move(mv));
                self.pending.push_back(PendingMove {
                    node: *id,
                    fen,
                    created: false,
                });
            }
        }
        tracing::debug!(
            "Game {}: replayed server from {:?} to {:?} ({} back)",
            self.id,
            server,
            base,
            back
        );
        Ok(())
    }

    /// 在链尾强制本方走子后校验并排队；失败时静默丢弃
    fn premove(&mut self, mv: Move) -> MoveOutcome {
        let Some(local) = self.local_side else {
            return MoveOutcome::Rejected;
        };
        if !self.ctx.settings.premove_enabled {
            self.notify(Notification::MoveRejected { mv });
            return MoveOutcome::Rejected;
        }
        let Some(tip) = self.history.node(self.history.tip()) else {
            return MoveOutcome::Rejected;
        };
        let fen = tip.fen.clone();
        let data = tip.variant_data.clone();

        let oracle = Arc::clone(&self.ctx.oracle);
        let initial = self.history.initial_fen().to_string();
        let variant = self.variant;
        let queued = self
            .premoves
            .enqueue(mv, &fen, data.as_deref(), local, |fen, data, mv| {
                oracle.apply_move(fen, mv, &initial, variant, data, true).ok()
            });
        if queued {
            self.notify(Notification::PremoveQueued { mv });
            MoveOutcome::Premoved
        } else {
            MoveOutcome::Rejected
        }
    }
}
